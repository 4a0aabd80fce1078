//! Chunked download engine: ranged fetches, worker pool, state machine.
//!
//! A download is split into a fixed set of contiguous byte-range chunks,
//! each streamed into its own part file by a bounded pool of workers. The
//! [`Coordinator`] owns one download's lifecycle (active, paused,
//! cancelled, completed) and assembles the part files into the target once
//! every chunk completes.
//!
//! # Example
//!
//! ```ignore
//! use swiftdl::download::{Coordinator, HttpClient};
//!
//! let client = HttpClient::new();
//! let size = client.probe_size(url).await?;
//! let coordinator = Coordinator::new(download, client, sink, UPDATE_PERIOD);
//! coordinator.run(token).await?;
//! ```

mod client;
pub mod constants;
mod coordinator;
mod error;
mod model;
mod worker;

pub use client::HttpClient;
pub use constants::{
    DB_FILE_NAME, DEFAULT_CHUNK_COUNT, DEFAULT_WORKER_COUNT, UPDATE_PERIOD,
};
pub use coordinator::Coordinator;
pub use error::DownloadError;
pub use model::{Chunk, Download, DownloadState, part_path, plan_chunks};
