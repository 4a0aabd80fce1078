//! Per-download coordinator: state machine, worker pool, and assembly.
//!
//! One coordinator owns one download for its whole lifetime. A *run*
//! (started by the manager on add, resume, or rehydration) spawns a bounded
//! worker pool, feeds it every non-completed chunk, and joins it. The
//! completion rule (a download is completed iff every chunk is) is decided
//! here and nowhere else.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::error::DownloadError;
use super::model::{Download, DownloadState, part_path};
use super::worker::{WorkerContext, run_worker};
use crate::events::UpdateThrottle;
use crate::progress::ProgressSink;

/// Coordinator for a single download.
///
/// The inner `Download` is guarded by one async mutex (the download lock);
/// it is held only across bookkeeping, never across network reads or file
/// writes.
pub struct Coordinator {
    download: Arc<Mutex<Download>>,
    client: HttpClient,
    sink: Arc<dyn ProgressSink>,
    throttle: Arc<UpdateThrottle>,
    id: i64,
    url: String,
    target_path: PathBuf,
    total_size: i64,
    chunk_count: u32,
    worker_count: u32,
}

impl Coordinator {
    /// Creates a coordinator over an already-persisted download record.
    #[must_use]
    pub fn new(
        download: Download,
        client: HttpClient,
        sink: Arc<dyn ProgressSink>,
        update_period: Duration,
    ) -> Self {
        Self {
            id: download.id,
            url: download.url.clone(),
            target_path: download.path.clone(),
            total_size: download.size,
            chunk_count: download.chunk_count,
            worker_count: download.worker_count,
            download: Arc::new(Mutex::new(download)),
            client,
            sink,
            throttle: Arc::new(UpdateThrottle::new(update_period)),
        }
    }

    /// The download's persistent id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Clones the current download state for read-only observers.
    pub async fn snapshot(&self) -> Download {
        self.download.lock().await.clone()
    }

    /// The download's current lifecycle state.
    pub async fn state(&self) -> DownloadState {
        self.download.lock().await.state
    }

    /// Runs the download to completion under the given cancellation token.
    ///
    /// Spawns `min(worker_count, chunk_count)` workers over a bounded queue,
    /// enqueues every non-completed chunk, closes the queue, and joins the
    /// pool. When every chunk completes, the part files are assembled into
    /// the target and the completed state is persisted and emitted.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Terminal`] when the download is already completed
    ///   or cancelled.
    /// - [`DownloadError::Cancelled`] when the token fired mid-run; chunk
    ///   states were already persisted by the workers.
    /// - [`DownloadError::Incomplete`] when the run finished with failed
    ///   chunks; the download stays active and resumable.
    /// - [`DownloadError::Assembly`] when concatenation failed; every chunk
    ///   stays completed, so a later run retries assembly only.
    #[instrument(skip(self, token), fields(download_id = self.id))]
    pub async fn run(&self, token: CancellationToken) -> Result<(), DownloadError> {
        {
            let mut download = self.download.lock().await;
            if download.state.is_terminal() {
                return Err(DownloadError::Terminal {
                    state: download.state,
                });
            }
            download.state = DownloadState::Active;
        }
        self.sink.notify_download(self.id, DownloadState::Active);

        let pool = self.worker_count.min(self.chunk_count).max(1) as usize;
        let (queue_tx, queue_rx) = mpsc::channel::<u32>(pool);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let ctx = Arc::new(WorkerContext {
            download: Arc::clone(&self.download),
            client: self.client.clone(),
            sink: Arc::clone(&self.sink),
            throttle: Arc::clone(&self.throttle),
            download_id: self.id,
            url: self.url.clone(),
            target_path: self.target_path.clone(),
            total_size: self.total_size,
        });

        let mut handles = Vec::with_capacity(pool);
        for _ in 0..pool {
            handles.push(tokio::spawn(run_worker(
                Arc::clone(&ctx),
                Arc::clone(&queue_rx),
                token.clone(),
            )));
        }
        // Workers hold the only receiver handles: once they all exit the
        // queue reports closed and the producer loop below stops blocking.
        drop(queue_rx);

        let pending: Vec<u32> = {
            let download = self.download.lock().await;
            download
                .chunks
                .iter()
                .filter(|chunk| chunk.state != DownloadState::Completed)
                .map(|chunk| chunk.index)
                .collect()
        };
        debug!(pending = pending.len(), workers = pool, "dispatching chunks");
        for index in pending {
            if queue_tx.send(index).await.is_err() {
                break;
            }
        }
        drop(queue_tx);

        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "worker task panicked");
            }
        }

        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let (state, completed) = {
            let download = self.download.lock().await;
            (download.state, download.completed_chunks)
        };
        if state == DownloadState::Cancelled {
            return Err(DownloadError::Cancelled);
        }
        if !self.all_chunks_completed().await {
            return Err(DownloadError::Incomplete {
                completed,
                total: self.chunk_count,
            });
        }

        self.assemble().await?;

        let chunks = {
            let mut download = self.download.lock().await;
            // A cancel that landed during assembly wins: cancelled is
            // terminal.
            if download.state == DownloadState::Cancelled {
                return Err(DownloadError::Cancelled);
            }
            download.state = DownloadState::Completed;
            download.chunks.clone()
        };
        if let Err(error) = self
            .sink
            .snapshot_state(self.id, DownloadState::Completed, &chunks)
            .await
        {
            warn!(
                download_id = self.id,
                error = %error,
                "failed to persist completed state"
            );
        }
        self.sink.notify_download(self.id, DownloadState::Completed);

        self.remove_parts().await;
        info!(download_id = self.id, "download complete");
        Ok(())
    }

    /// Transitions every active chunk (and the download) to paused.
    ///
    /// The download-level event is emitted only when the state actually
    /// changed; pausing an already-paused download is silent. Terminal
    /// states are left untouched.
    #[instrument(skip(self), fields(download_id = self.id))]
    pub async fn pause(&self) {
        let mut download = self.download.lock().await;
        if download.state.is_terminal() {
            return;
        }
        let was_active = download.state == DownloadState::Active;

        for slot in 0..download.chunks.len() {
            if download.chunks[slot].state != DownloadState::Active {
                continue;
            }
            download.chunks[slot].state = DownloadState::Paused;
            let snapshot = download.chunks[slot].clone();
            if let Err(error) = self.sink.update_chunk(&snapshot).await {
                warn!(chunk = snapshot.index, error = %error, "failed to persist chunk pause");
            }
            if self.throttle.should_emit() {
                self.sink.notify_chunk(self.id, self.total_size, &snapshot);
            }
        }

        if was_active {
            download.state = DownloadState::Paused;
            self.sink.notify_download(self.id, DownloadState::Paused);
        }
    }

    /// Marks the download and every chunk cancelled; terminal.
    ///
    /// A no-op on downloads that are already completed or cancelled. Part
    /// files are removed best-effort since a cancelled download can never
    /// reuse them.
    #[instrument(skip(self), fields(download_id = self.id))]
    pub async fn cancel(&self) {
        {
            let mut download = self.download.lock().await;
            if download.state.is_terminal() {
                return;
            }
            download.state = DownloadState::Cancelled;

            for slot in 0..download.chunks.len() {
                download.chunks[slot].state = DownloadState::Cancelled;
                let snapshot = download.chunks[slot].clone();
                if let Err(error) = self.sink.update_chunk(&snapshot).await {
                    warn!(chunk = snapshot.index, error = %error, "failed to persist chunk cancel");
                }
                if self.throttle.should_emit() {
                    self.sink.notify_chunk(self.id, self.total_size, &snapshot);
                }
            }
            self.sink.notify_download(self.id, DownloadState::Cancelled);
        }
        self.remove_parts().await;
    }

    async fn all_chunks_completed(&self) -> bool {
        self.download.lock().await.all_chunks_completed()
    }

    /// Concatenates part files 0..N into the target.
    async fn assemble(&self) -> Result<(), DownloadError> {
        debug!(path = %self.target_path.display(), "assembling part files");
        let mut target = File::create(&self.target_path)
            .await
            .map_err(|e| DownloadError::assembly(&self.target_path, e))?;

        for index in 0..self.chunk_count {
            let part = part_path(&self.target_path, index);
            let mut part_file = File::open(&part)
                .await
                .map_err(|e| DownloadError::assembly(&part, e))?;
            tokio::io::copy(&mut part_file, &mut target)
                .await
                .map_err(|e| DownloadError::assembly(&part, e))?;
        }

        target
            .flush()
            .await
            .map_err(|e| DownloadError::assembly(&self.target_path, e))?;
        Ok(())
    }

    /// Removes every part file; failures are logged, never fatal.
    async fn remove_parts(&self) {
        for index in 0..self.chunk_count {
            let part = part_path(&self.target_path, index);
            if let Err(error) = tokio::fs::remove_file(&part).await {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %error, "failed to remove part file");
                }
            }
        }
    }
}
