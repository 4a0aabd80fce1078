//! Capability seam between coordinators and the manager-owned services.
//!
//! A coordinator must persist chunk progress and push events, both of which
//! the manager owns. Handing the coordinator the manager itself would create
//! a cycle, so it receives only this narrow interface at construction.

use async_trait::async_trait;

use crate::download::{Chunk, DownloadState};
use crate::events::{DownloadEvent, EventBus};
use crate::store::{DownloadStore, StoreError};

/// The operations a coordinator may invoke on its owner.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Persists a chunk's `(state, written)` to the store.
    async fn update_chunk(&self, chunk: &Chunk) -> Result<(), StoreError>;

    /// Emits a chunk-progress event. Fire-and-forget.
    fn notify_chunk(&self, download_id: i64, total_size: i64, chunk: &Chunk);

    /// Emits a download state-transition event. Fire-and-forget.
    fn notify_download(&self, download_id: i64, state: DownloadState);

    /// Persists a download state transition together with a snapshot of the
    /// given chunks (see [`DownloadStore::update_download_state`]).
    async fn snapshot_state(
        &self,
        download_id: i64,
        state: DownloadState,
        chunks: &[Chunk],
    ) -> Result<(), StoreError>;
}

/// Store- and bus-backed sink handed to every coordinator.
#[derive(Debug, Clone)]
pub struct StoreSink {
    store: DownloadStore,
    events: EventBus,
}

impl StoreSink {
    /// Creates a sink over the given store and event bus.
    #[must_use]
    pub fn new(store: DownloadStore, events: EventBus) -> Self {
        Self { store, events }
    }
}

#[async_trait]
impl ProgressSink for StoreSink {
    async fn update_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        self.store.update_chunk(chunk).await
    }

    fn notify_chunk(&self, download_id: i64, total_size: i64, chunk: &Chunk) {
        self.events
            .emit(DownloadEvent::chunk(download_id, total_size, chunk));
    }

    fn notify_download(&self, download_id: i64, state: DownloadState) {
        self.events.emit(DownloadEvent::download(download_id, state));
    }

    async fn snapshot_state(
        &self,
        download_id: i64,
        state: DownloadState,
        chunks: &[Chunk],
    ) -> Result<(), StoreError> {
        self.store
            .update_download_state(download_id, state, chunks)
            .await
    }
}
