//! Constants for the download module (timeouts, pooling, progress cadence).

use std::time::Duration;

/// Minimum delay between two chunk-progress events for one download.
pub const UPDATE_PERIOD: Duration = Duration::from_millis(200);

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-read timeout on chunk streams (60 seconds).
///
/// Applied as a read timeout rather than a total-request timeout so large
/// transfers are never bounded by wall-clock duration.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Maximum idle keep-alive connections retained per host.
pub const MAX_IDLE_PER_HOST: usize = 10;

/// Idle keep-alive connections are dropped after this long (90 seconds).
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Default chunk count for new downloads when the caller passes none.
pub const DEFAULT_CHUNK_COUNT: u32 = 8;

/// Default worker pool size for new downloads when the caller passes none.
pub const DEFAULT_WORKER_COUNT: u32 = 4;

/// Database file created in the working directory.
pub const DB_FILE_NAME: &str = "downloads.db";
