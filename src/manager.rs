//! Process-wide download registry and command surface.
//!
//! The [`DownloadManager`] owns every coordinator, the cancellation handle
//! of each live run, the persistence store, and the event bus. All command
//! operations (add, pause, resume, cancel, list) take the manager lock for
//! their whole duration; none of them sit on the transfer hot path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::download::{
    Coordinator, Download, DownloadError, DownloadState, HttpClient, UPDATE_PERIOD, plan_chunks,
};
use crate::events::EventBus;
use crate::progress::{ProgressSink, StoreSink};
use crate::store::{DownloadStore, StoreError};

/// Manager-level errors for the command surface.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No download with this id is registered.
    #[error("download {id} not found")]
    NotFound {
        /// The unknown id.
        id: i64,
    },

    /// The operation is not valid on a terminal download.
    #[error("download {id} is already {state}")]
    AlreadyTerminal {
        /// The download id.
        id: i64,
        /// Its terminal state.
        state: DownloadState,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Download-engine failure (size probe, fetch, assembly).
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Tunables applied to every download the manager creates.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Minimum delay between chunk-progress events per download.
    pub update_period: Duration,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            update_period: UPDATE_PERIOD,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// Cancellation handle of one live coordinator run.
struct ActiveRun {
    token: CancellationToken,
    run_id: u64,
}

#[derive(Default)]
struct Inner {
    downloads: HashMap<i64, Arc<Coordinator>>,
    active: HashMap<i64, ActiveRun>,
}

/// Process-wide registry of downloads keyed by id.
pub struct DownloadManager {
    store: DownloadStore,
    events: EventBus,
    sink: Arc<dyn ProgressSink>,
    options: ManagerOptions,
    inner: Arc<Mutex<Inner>>,
    next_run_id: AtomicU64,
}

impl DownloadManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: DownloadStore, options: ManagerOptions) -> Self {
        let events = EventBus::new();
        let sink: Arc<dyn ProgressSink> =
            Arc::new(StoreSink::new(store.clone(), events.clone()));
        Self {
            store,
            events,
            sink,
            options,
            inner: Arc::new(Mutex::new(Inner::default())),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// The event bus observers subscribe to.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Adds a download, or attaches to the persisted record for the same
    /// `(url, path)` pair.
    ///
    /// A matching non-terminal record is registered and started (unless a
    /// run is already live); a terminal record is registered untouched. For
    /// genuinely new downloads the size is discovered via HEAD, the target
    /// directory is created user-only (mode 0700), the chunk ranges are
    /// planned, and the record is persisted in one transaction before the
    /// run starts.
    ///
    /// Returns the download id.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Download`] when size discovery or directory
    /// creation fails (nothing is persisted), or [`ManagerError::Store`] on
    /// persistence failure.
    #[instrument(skip(self, path), fields(url = %url, path = %path.display()))]
    pub async fn add_download(
        &self,
        url: &str,
        path: &Path,
        chunks: u32,
        workers: u32,
    ) -> Result<i64, ManagerError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = self.store.find_download(url, path).await? {
            let id = existing.id;
            debug!(download_id = id, "attaching to existing download");
            let coordinator = self.register_locked(&mut inner, existing);
            let state = coordinator.state().await;
            if !state.is_terminal() && !inner.active.contains_key(&id) {
                self.start_locked(&mut inner, coordinator).await?;
            }
            return Ok(id);
        }

        let client = HttpClient::with_timeouts(
            self.options.connect_timeout_secs,
            self.options.read_timeout_secs,
        );
        let size = client.probe_size(url).await?;

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_target_dir(dir).await?;
        }

        let planned = plan_chunks(size, chunks);
        let chunk_count = u32::try_from(planned.len()).unwrap_or(1);
        let worker_count = workers.max(1).min(chunk_count);
        let mut download = Download {
            id: 0,
            url: url.to_string(),
            path: path.to_path_buf(),
            size,
            chunk_count,
            worker_count,
            state: DownloadState::Active,
            completed_chunks: 0,
            chunks: planned,
        };
        self.store.insert_download(&mut download).await?;
        info!(
            download_id = download.id,
            size,
            chunks = chunk_count,
            workers = worker_count,
            "download created"
        );

        let id = download.id;
        // The probe client is kept for the workers so its connection pool
        // is already warm.
        let coordinator = Arc::new(Coordinator::new(
            download,
            client,
            Arc::clone(&self.sink),
            self.options.update_period,
        ));
        inner.downloads.insert(id, Arc::clone(&coordinator));
        self.start_locked(&mut inner, coordinator).await?;
        Ok(id)
    }

    /// Read-only snapshot of every registered download, ordered by id.
    pub async fn all_downloads(&self) -> Vec<Download> {
        let coordinators: Vec<Arc<Coordinator>> = {
            let inner = self.inner.lock().await;
            inner.downloads.values().cloned().collect()
        };

        let mut snapshots = Vec::with_capacity(coordinators.len());
        for coordinator in coordinators {
            snapshots.push(coordinator.snapshot().await);
        }
        snapshots.sort_by_key(|download| download.id);
        snapshots
    }

    /// Pauses a download: fires the run's cancellation token, transitions
    /// active chunks, and snapshots the progress into the store.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotFound`] for unknown ids,
    /// [`ManagerError::AlreadyTerminal`] for completed/cancelled downloads,
    /// [`ManagerError::Store`] when the snapshot write fails.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: i64) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        let coordinator = inner
            .downloads
            .get(&id)
            .cloned()
            .ok_or(ManagerError::NotFound { id })?;
        let state = coordinator.state().await;
        if state.is_terminal() {
            return Err(ManagerError::AlreadyTerminal { id, state });
        }

        if let Some(run) = inner.active.remove(&id) {
            run.token.cancel();
        }
        coordinator.pause().await;

        let snapshot = coordinator.snapshot().await;
        self.store
            .update_download_state(id, DownloadState::Paused, &snapshot.chunks)
            .await?;
        Ok(())
    }

    /// Resumes a paused download on a fresh cancellation token. Resuming a
    /// download whose run is already live is a no-op.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotFound`] for unknown ids,
    /// [`ManagerError::AlreadyTerminal`] for completed/cancelled downloads,
    /// [`ManagerError::Store`] when the snapshot write fails.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: i64) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        let coordinator = inner
            .downloads
            .get(&id)
            .cloned()
            .ok_or(ManagerError::NotFound { id })?;
        let state = coordinator.state().await;
        if state.is_terminal() {
            return Err(ManagerError::AlreadyTerminal { id, state });
        }
        if inner.active.contains_key(&id) {
            debug!(download_id = id, "resume ignored: run already live");
            return Ok(());
        }

        self.start_locked(&mut inner, Arc::clone(&coordinator)).await?;

        let snapshot = coordinator.snapshot().await;
        self.store
            .update_download_state(id, DownloadState::Active, &snapshot.chunks)
            .await?;
        Ok(())
    }

    /// Cancels a download; terminal and idempotent. Cancelling a completed
    /// (or already cancelled) download is a no-op success.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotFound`] for unknown ids,
    /// [`ManagerError::Store`] when the snapshot write fails.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: i64) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        let coordinator = inner
            .downloads
            .get(&id)
            .cloned()
            .ok_or(ManagerError::NotFound { id })?;
        let state = coordinator.state().await;
        if state.is_terminal() {
            return Ok(());
        }

        if let Some(run) = inner.active.remove(&id) {
            run.token.cancel();
        }
        coordinator.cancel().await;

        let snapshot = coordinator.snapshot().await;
        self.store
            .update_download_state(id, DownloadState::Cancelled, &snapshot.chunks)
            .await?;
        Ok(())
    }

    /// Rehydrates every persisted download and auto-starts the non-terminal
    /// ones. Terminal downloads are registered but never started. A
    /// download that fails to start is logged and skipped; the rest keep
    /// loading.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the initial listing fails.
    #[instrument(skip(self))]
    pub async fn load_from_store(&self) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        for download in self.store.list_all().await? {
            let id = download.id;
            let coordinator = self.register_locked(&mut inner, download);
            let state = coordinator.state().await;
            if state.is_terminal() || inner.active.contains_key(&id) {
                continue;
            }
            if let Err(error) = self.start_locked(&mut inner, coordinator).await {
                warn!(download_id = id, error = %error, "failed to start rehydrated download");
            }
        }
        Ok(())
    }

    /// Registers every persisted download without starting any of them.
    /// Used by one-shot control commands that must not kick off transfers.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Store`] when the listing fails.
    #[instrument(skip(self))]
    pub async fn attach_from_store(&self) -> Result<(), ManagerError> {
        let mut inner = self.inner.lock().await;
        for download in self.store.list_all().await? {
            self.register_locked(&mut inner, download);
        }
        Ok(())
    }

    /// True when no coordinator run is live.
    pub async fn idle(&self) -> bool {
        self.inner.lock().await.active.is_empty()
    }

    /// Registers a coordinator for `download`, reusing an existing registry
    /// entry (whose in-memory state is fresher than the store's).
    fn register_locked(&self, inner: &mut Inner, download: Download) -> Arc<Coordinator> {
        let id = download.id;
        if let Some(existing) = inner.downloads.get(&id) {
            return Arc::clone(existing);
        }
        let client = HttpClient::with_timeouts(
            self.options.connect_timeout_secs,
            self.options.read_timeout_secs,
        );
        let coordinator = Arc::new(Coordinator::new(
            download,
            client,
            Arc::clone(&self.sink),
            self.options.update_period,
        ));
        inner.downloads.insert(id, Arc::clone(&coordinator));
        coordinator
    }

    /// Spawns a coordinator run on a fresh cancellation token and records
    /// the handle. The run unregisters itself when it ends, unless a newer
    /// run already replaced it.
    async fn start_locked(
        &self,
        inner: &mut Inner,
        coordinator: Arc<Coordinator>,
    ) -> Result<(), ManagerError> {
        let id = coordinator.id();
        let state = coordinator.state().await;
        if state.is_terminal() {
            return Err(ManagerError::AlreadyTerminal { id, state });
        }

        let token = CancellationToken::new();
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        inner.active.insert(
            id,
            ActiveRun {
                token: token.clone(),
                run_id,
            },
        );

        let registry = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match coordinator.run(token).await {
                Ok(()) => info!(download_id = id, "download run finished"),
                Err(DownloadError::Cancelled) => {
                    debug!(download_id = id, "download run interrupted");
                }
                Err(error) => warn!(download_id = id, error = %error, "download run failed"),
            }

            let mut inner = registry.lock().await;
            if inner
                .active
                .get(&id)
                .is_some_and(|run| run.run_id == run_id)
            {
                inner.active.remove(&id);
            }
        });
        Ok(())
    }
}

/// Creates the target directory with user-only permissions.
async fn create_target_dir(dir: &Path) -> Result<(), DownloadError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))
}
