//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and user feedback.

use std::path::PathBuf;

use thiserror::Error;

use super::model::DownloadState;

/// Errors that can occur while probing, fetching, or assembling a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The HEAD size probe returned a non-200 status.
    #[error("size discovery failed for {url}: HTTP {status}")]
    SizeDiscovery {
        /// The URL that was probed.
        url: String,
        /// The HTTP status code returned by the server.
        status: u16,
    },

    /// The HEAD size probe reported no usable Content-Length.
    #[error("size discovery failed for {url}: no usable Content-Length")]
    MissingLength {
        /// The URL that was probed.
        url: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors,
    /// read timeout, etc.)
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// A ranged GET returned a status other than 200 or 206.
    #[error("unexpected HTTP {status} for range {start}-{end} of {url}")]
    RangeStatus {
        /// The URL that was fetched.
        url: String,
        /// The HTTP status code returned by the server.
        status: u16,
        /// First byte of the requested window.
        start: i64,
        /// Last byte of the requested window.
        end: i64,
    },

    /// File system error (create, seek, write) on a part file.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted by a pause or cancel signal.
    #[error("download cancelled")]
    Cancelled,

    /// A run finished with chunks still incomplete; the download stays
    /// resumable.
    #[error("{completed} of {total} chunks completed")]
    Incomplete {
        /// Chunks in `Completed` state after the run.
        completed: u32,
        /// Total chunk count.
        total: u32,
    },

    /// Concatenating part files into the target failed. The download keeps
    /// its chunks complete; a later start retries assembly only.
    #[error("assembly failed at {path}: {source}")]
    Assembly {
        /// The file being read or written when the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download is already in a terminal state.
    #[error("download is already {state}")]
    Terminal {
        /// The terminal state the download holds.
        state: DownloadState,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a size-discovery error for a non-200 HEAD status.
    pub fn size_discovery(url: impl Into<String>, status: u16) -> Self {
        Self::SizeDiscovery {
            url: url.into(),
            status,
        }
    }

    /// Creates a missing-length error.
    pub fn missing_length(url: impl Into<String>) -> Self {
        Self::MissingLength { url: url.into() }
    }

    /// Creates a range-status error.
    pub fn range_status(url: impl Into<String>, status: u16, start: i64, end: i64) -> Self {
        Self::RangeStatus {
            url: url.into(),
            status,
            start,
            end,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an assembly error.
    pub fn assembly(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Assembly {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because the variants require context (url, path)
// that the source errors don't carry. The helper constructors are the
// pattern here.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_size_discovery_display() {
        let error = DownloadError::size_discovery("https://example.com/f.bin", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("https://example.com/f.bin"));
    }

    #[test]
    fn test_range_status_display() {
        let error = DownloadError::range_status("https://example.com/f.bin", 416, 100, 199);
        let msg = error.to_string();
        assert!(msg.contains("416"), "Expected '416' in: {msg}");
        assert!(msg.contains("100-199"), "Expected range in: {msg}");
    }

    #[test]
    fn test_io_display_contains_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/x.bin.part-0"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/x.bin.part-0"), "Expected path in: {msg}");
    }

    #[test]
    fn test_terminal_display_uses_state_label() {
        let error = DownloadError::Terminal {
            state: DownloadState::Cancelled,
        };
        assert!(error.to_string().contains("cancelled"));
    }

    #[test]
    fn test_incomplete_display() {
        let error = DownloadError::Incomplete {
            completed: 3,
            total: 4,
        };
        assert_eq!(error.to_string(), "3 of 4 chunks completed");
    }
}
