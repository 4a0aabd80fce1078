//! Persistent, resumable multi-connection downloader.
//!
//! Splits an HTTP(S) resource into a fixed set of byte-range chunks,
//! streams them concurrently over a bounded worker pool, persists per-chunk
//! progress to SQLite, and atomically assembles the final file. Downloads
//! survive process restart: persisted state is rehydrated on startup and
//! incomplete chunks resume from the byte offset their part file reached.
//!
//! # Architecture
//!
//! - [`store`] - SQLite persistence for downloads and chunks
//! - [`download`] - Chunked download engine (client, workers, coordinator)
//! - [`events`] - Progress event bus and emission throttle
//! - [`progress`] - Capability seam between coordinators and the manager
//! - [`manager`] - Process-wide registry and command surface

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod events;
pub mod manager;
pub mod progress;
pub mod store;

// Re-export commonly used types
pub use download::{
    Chunk, Coordinator, DB_FILE_NAME, DEFAULT_CHUNK_COUNT, DEFAULT_WORKER_COUNT, Download,
    DownloadError, DownloadState, HttpClient, UPDATE_PERIOD, part_path, plan_chunks,
};
pub use events::{ChunkUpdate, DownloadEvent, DownloadUpdate, EventBus, UpdateThrottle};
pub use manager::{DownloadManager, ManagerError, ManagerOptions};
pub use progress::{ProgressSink, StoreSink};
pub use store::{DownloadStore, StoreError};
