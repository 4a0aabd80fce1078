//! CLI entry point for the swiftdl downloader.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use swiftdl::{DownloadEvent, DownloadManager, DownloadStore, ManagerOptions};

mod cli;
mod config;

use cli::{Cli, Command};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let cli = Cli::parse();
    let config = Config::load()?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let options = ManagerOptions {
        update_period: Duration::from_millis(config.update_period_ms),
        connect_timeout_secs: config.connect_timeout_secs,
        read_timeout_secs: config.read_timeout_secs,
    };

    let store = DownloadStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open database at '{}'", db_path.display()))?;
    let manager = Arc::new(DownloadManager::new(store, options));

    match cli.command {
        Command::Add(args) => {
            let events = manager.events().subscribe();
            let (chunks, workers) = resolve_pool_sizes(&args, &config);
            let id = manager
                .add_download(&args.url, &args.path, chunks, workers)
                .await?;
            info!(download_id = id, "download added");
            follow(&manager, events).await;
        }
        Command::List => {
            manager.attach_from_store().await?;
            let downloads = manager.all_downloads().await;
            println!("{}", serde_json::to_string_pretty(&downloads)?);
        }
        Command::Run => {
            let events = manager.events().subscribe();
            manager.load_from_store().await?;
            follow(&manager, events).await;
        }
        Command::Pause { id } => {
            manager.attach_from_store().await?;
            manager.pause(id).await?;
            info!(download_id = id, "download paused");
        }
        Command::Resume { id } => {
            let events = manager.events().subscribe();
            manager.attach_from_store().await?;
            manager.resume(id).await?;
            follow(&manager, events).await;
        }
        Command::Cancel { id } => {
            manager.attach_from_store().await?;
            manager.cancel(id).await?;
            info!(download_id = id, "download cancelled");
        }
    }

    Ok(())
}

/// CLI flags win over the config file (which already folded in the
/// compiled defaults).
fn resolve_pool_sizes(args: &cli::AddArgs, config: &Config) -> (u32, u32) {
    let chunks = args.chunks.unwrap_or(config.chunk_count);
    let workers = args.workers.unwrap_or(config.worker_count);
    (chunks, workers)
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Prints the event stream until every live run has finished, then reports
/// each download's final state.
async fn follow(manager: &DownloadManager, mut events: broadcast::Receiver<DownloadEvent>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(300));
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DownloadEvent::Chunk(update)) => info!(
                    download_id = update.download_id,
                    chunk = update.chunk_index,
                    written = update.written,
                    size = update.size,
                    "progress"
                ),
                Ok(DownloadEvent::Download(update)) => info!(
                    download_id = update.download_id,
                    state = %update.state,
                    "state change"
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                if manager.idle().await {
                    break;
                }
            }
        }
    }

    for download in manager.all_downloads().await {
        info!(
            download_id = download.id,
            state = %download.state,
            completed_chunks = download.completed_chunks,
            chunks = download.chunk_count,
            "final state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use super::cli::AddArgs;

    #[test]
    fn test_resolve_pool_sizes_prefers_cli_over_config() {
        let config = Config {
            chunk_count: 12,
            worker_count: 6,
            ..Config::default()
        };

        let args = AddArgs {
            url: "https://example.com/f.bin".to_string(),
            path: PathBuf::from("/tmp/f.bin"),
            chunks: Some(3),
            workers: None,
        };
        assert_eq!(resolve_pool_sizes(&args, &config), (3, 6));

        let args = AddArgs {
            url: "https://example.com/f.bin".to_string(),
            path: PathBuf::from("/tmp/f.bin"),
            chunks: None,
            workers: None,
        };
        assert_eq!(resolve_pool_sizes(&args, &config), (12, 6));
    }
}
