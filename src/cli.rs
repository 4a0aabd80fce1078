//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Persistent, resumable multi-connection file downloader.
///
/// Downloads are split into byte-range chunks fetched concurrently and
/// persisted to a local database, so an interrupted transfer resumes from
/// where each chunk left off.
#[derive(Parser, Debug)]
#[command(name = "swiftdl")]
#[command(author, version, about)]
pub struct Cli {
    /// Database file (default: downloads.db in the working directory).
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a download and follow it until it finishes.
    Add(AddArgs),
    /// Print every known download as JSON.
    List,
    /// Resume all unfinished downloads and follow them to completion.
    Run,
    /// Pause an active download.
    Pause {
        /// Download id (see `list`).
        id: i64,
    },
    /// Resume a paused download and follow it until it finishes.
    Resume {
        /// Download id (see `list`).
        id: i64,
    },
    /// Cancel a download permanently.
    Cancel {
        /// Download id (see `list`).
        id: i64,
    },
}

/// Arguments for `swiftdl add`.
#[derive(ClapArgs, Debug)]
pub struct AddArgs {
    /// Source URL (HTTP or HTTPS).
    pub url: String,

    /// Target file path; part files are created next to it.
    pub path: PathBuf,

    /// Number of byte-range chunks (default from config, then 8).
    #[arg(short, long, value_name = "N")]
    pub chunks: Option<u32>,

    /// Worker pool size (default from config, then 4; clamped to the
    /// chunk count).
    #[arg(short, long, value_name = "N")]
    pub workers: Option<u32>,
}
