//! Core data model: download/chunk records, states, and range planning.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Lifecycle state shared by downloads and chunks.
///
/// The integer encoding is bit-exact across the database, the in-memory
/// model, and the event wire: `0 = Active, 1 = Paused, 2 = Cancelled,
/// 3 = Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Currently downloading (or eligible to download).
    Active,
    /// Suspended by the user; resumable.
    Paused,
    /// Terminally abandoned; never leaves this state.
    Cancelled,
    /// All bytes transferred and assembled; terminal for downloading.
    Completed,
}

impl DownloadState {
    /// Returns the wire/database integer encoding.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Active => 0,
            Self::Paused => 1,
            Self::Cancelled => 2,
            Self::Completed => 3,
        }
    }

    /// Parses the integer encoding; `None` for unknown values.
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            1 => Some(Self::Paused),
            2 => Some(Self::Cancelled),
            3 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Returns true for states that admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Stable lowercase label for logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DownloadState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for DownloadState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::from_i64(value)
            .ok_or_else(|| de::Error::custom(format!("invalid download state: {value}")))
    }
}

/// One contiguous byte-range of a download.
///
/// `start_byte` and `end_byte` are inclusive and fixed at creation;
/// `written` counts bytes already flushed to the chunk's part file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Row id assigned by the store on first persist.
    pub id: i64,
    /// Zero-based position within the download; fixed at creation.
    pub index: u32,
    /// First byte of the range (inclusive).
    pub start_byte: i64,
    /// Last byte of the range (inclusive).
    pub end_byte: i64,
    /// Bytes already persisted to the part file.
    pub written: i64,
    /// Current lifecycle state.
    pub state: DownloadState,
}

impl Chunk {
    /// Total length of the byte range.
    #[must_use]
    pub fn len(&self) -> i64 {
        self.end_byte - self.start_byte + 1
    }

    /// True when the range holds no bytes (never produced by planning).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }

    /// Bytes still missing from the part file.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        (self.len() - self.written).max(0)
    }
}

/// One logical file transfer with its fixed set of chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    /// Row id assigned by the store on first persist (0 until then).
    pub id: i64,
    /// Source URL; immutable after creation.
    pub url: String,
    /// Final destination path; immutable after creation.
    pub path: PathBuf,
    /// Total resource size in bytes, from the HEAD probe.
    pub size: i64,
    /// Number of chunks; fixed at creation.
    pub chunk_count: u32,
    /// Worker pool size recorded at creation (already clamped to the
    /// chunk count).
    pub worker_count: u32,
    /// Current lifecycle state.
    pub state: DownloadState,
    /// Cached count of chunks in `Completed` state.
    pub completed_chunks: u32,
    /// The fixed chunk collection, ordered by index.
    pub chunks: Vec<Chunk>,
}

impl Download {
    /// True when every chunk reached `Completed`.
    #[must_use]
    pub fn all_chunks_completed(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| chunk.state == DownloadState::Completed)
    }
}

/// Partitions `size` bytes into `requested` equal chunks, the remainder
/// absorbed by the last chunk.
///
/// The chunk count is clamped to `size` so every range holds at least one
/// byte; callers guarantee `size >= 1`.
#[must_use]
pub fn plan_chunks(size: i64, requested: u32) -> Vec<Chunk> {
    let count = i64::from(requested.max(1)).min(size).max(1);
    let chunk_size = size / count;

    let mut chunks = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
    for i in 0..count {
        let start = chunk_size * i;
        let end = if i == count - 1 {
            size - 1
        } else {
            start + chunk_size - 1
        };
        chunks.push(Chunk {
            id: 0,
            index: u32::try_from(i).unwrap_or_default(),
            start_byte: start,
            end_byte: end,
            written: 0,
            state: DownloadState::Active,
        });
    }
    chunks
}

/// Path of the on-disk part file for chunk `index` of `target`.
///
/// Part files live next to the target as `<target>.part-<index>`; the
/// target itself is only created at assembly time.
#[must_use]
pub fn part_path(target: &Path, index: u32) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".part-{index}"));
    PathBuf::from(name)
}
