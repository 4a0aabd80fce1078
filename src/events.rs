//! Progress event payloads, the broadcast bus, and the per-download
//! emission throttle.
//!
//! Events are fire-and-forget: `emit` never blocks and delivery is
//! best-effort (lagging subscribers drop the oldest events). Chunk-progress
//! events are rate-limited per download through [`UpdateThrottle`];
//! download-level state transitions bypass the throttle.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::download::{Chunk, DownloadState};

/// Broadcast channel capacity for download events.
const CHANNEL_CAPACITY: usize = 256;

/// Per-chunk progress update, emitted on topic `chunkUpdate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpdate {
    /// Owning download id.
    pub download_id: i64,
    /// Zero-based chunk position.
    pub chunk_index: u32,
    /// Chunk row id.
    pub chunk_id: i64,
    /// Bytes persisted to the part file so far.
    pub written: i64,
    /// Total size of the download in bytes.
    pub size: i64,
    /// Current chunk state.
    pub state: DownloadState,
}

/// Download-level state transition, emitted on topic `downloadUpdate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUpdate {
    /// The download that transitioned.
    pub download_id: i64,
    /// The state it transitioned to.
    pub state: DownloadState,
}

/// Either event kind, tagged with its topic on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload")]
pub enum DownloadEvent {
    /// Chunk progress.
    #[serde(rename = "chunkUpdate")]
    Chunk(ChunkUpdate),
    /// Download state transition.
    #[serde(rename = "downloadUpdate")]
    Download(DownloadUpdate),
}

impl DownloadEvent {
    /// Builds a chunk-progress event from the chunk's current bookkeeping.
    #[must_use]
    pub fn chunk(download_id: i64, total_size: i64, chunk: &Chunk) -> Self {
        Self::Chunk(ChunkUpdate {
            download_id,
            chunk_index: chunk.index,
            chunk_id: chunk.id,
            written: chunk.written,
            size: total_size,
            state: chunk.state,
        })
    }

    /// Builds a download state-transition event.
    #[must_use]
    pub fn download(download_id: i64, state: DownloadState) -> Self {
        Self::Download(DownloadUpdate { download_id, state })
    }
}

/// Broadcast bus carrying [`DownloadEvent`]s to external observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    /// Creates a new bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emits an event to all subscribers; never blocks, never fails.
    pub fn emit(&self, event: DownloadEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-download throttle capping chunk-progress emissions to one per
/// period across all chunks of the download.
#[derive(Debug)]
pub struct UpdateThrottle {
    period: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl UpdateThrottle {
    /// Creates a throttle with the given minimum emission period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_emit: Mutex::new(None),
        }
    }

    /// Returns true (and records the emission) when at least one period has
    /// elapsed since the previous emission. The first call always passes.
    pub fn should_emit(&self) -> bool {
        let mut last = self
            .last_emit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
