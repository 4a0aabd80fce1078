//! SQLite-backed persistence for downloads and their chunks.
//!
//! The store is the only durable state in the system. It owns its
//! connection pool outright: `open` creates the database file if needed and
//! applies the fixed two-table schema, so there is no separate migration
//! step. It offers the five operations the manager and coordinators need:
//!
//! - [`DownloadStore::insert_download`]: one transaction inserting the
//!   download row and all of its chunk rows
//! - [`DownloadStore::update_chunk`]: idempotent per-chunk progress write
//! - [`DownloadStore::update_download_state`]: state transition plus a
//!   snapshot of `(state, written)` onto every non-completed chunk
//! - [`DownloadStore::find_download`]: lookup by `(url, path)`
//! - [`DownloadStore::list_all`]: full rehydration on startup
//!
//! Writes are serialized by the callers (manager or download lock), so the
//! store itself carries no locking beyond the connection pool.

use std::path::Path;
use std::time::Duration;

use sqlx::FromRow;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tracing::instrument;

use crate::download::{Chunk, Download, DownloadState};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Writes come from one download at a time; the spare connections serve
/// read-only snapshots (`list`, duplicate-add lookups).
const MAX_CONNECTIONS: u32 = 4;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Applied statement by statement on every open; each is a no-op when the
/// object already exists. State encoding is shared with the in-memory and
/// event-wire forms: 0 = active, 1 = paused, 2 = cancelled, 3 = completed.
const SCHEMA: [&str; 3] = [
    r"CREATE TABLE IF NOT EXISTS downloads (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        url     TEXT NOT NULL,
        path    TEXT NOT NULL,
        size    INTEGER NOT NULL,
        chunks  INTEGER NOT NULL,
        workers INTEGER NOT NULL,
        state   INTEGER NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS chunks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        download_id INTEGER NOT NULL REFERENCES downloads (id),
        chunk_index INTEGER NOT NULL,
        start_byte  INTEGER NOT NULL,
        end_byte    INTEGER NOT NULL,
        written     INTEGER NOT NULL,
        state       INTEGER NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_chunks_download_id ON chunks (download_id)",
];

/// Persistence-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted row holds a value outside its domain.
    #[error("invalid persisted value for {column}: {value}")]
    InvalidRow {
        /// Column the value was read from.
        column: &'static str,
        /// The offending value.
        value: i64,
    },
}

/// Raw `downloads` row as stored.
#[derive(Debug, FromRow)]
struct DownloadRow {
    id: i64,
    url: String,
    path: String,
    size: i64,
    chunks: i64,
    workers: i64,
    state: i64,
}

/// Raw `chunks` row as stored.
#[derive(Debug, FromRow)]
struct ChunkRow {
    id: i64,
    chunk_index: i64,
    start_byte: i64,
    end_byte: i64,
    written: i64,
    state: i64,
}

fn parse_state(column: &'static str, value: i64) -> Result<DownloadState> {
    DownloadState::from_i64(value).ok_or(StoreError::InvalidRow { column, value })
}

fn parse_count(column: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidRow { column, value })
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        Ok(Chunk {
            id: self.id,
            index: parse_count("chunk_index", self.chunk_index)?,
            start_byte: self.start_byte,
            end_byte: self.end_byte,
            written: self.written,
            state: parse_state("chunks.state", self.state)?,
        })
    }
}

impl DownloadRow {
    fn into_download(self, chunks: Vec<Chunk>) -> Result<Download> {
        let completed = chunks
            .iter()
            .filter(|chunk| chunk.state == DownloadState::Completed)
            .count();
        Ok(Download {
            id: self.id,
            url: self.url,
            path: self.path.into(),
            size: self.size,
            chunk_count: parse_count("downloads.chunks", self.chunks)?,
            worker_count: parse_count("downloads.workers", self.workers)?,
            state: parse_state("downloads.state", self.state)?,
            completed_chunks: u32::try_from(completed).unwrap_or_default(),
            chunks,
        })
    }
}

/// Persistence store for downloads and chunks.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    pool: SqlitePool,
}

impl DownloadStore {
    /// Opens (creating if missing) the database at `path` and ensures the
    /// schema exists.
    ///
    /// Progress writes arrive on every streamed frame, so the connection is
    /// tuned for that write pattern: WAL journaling with `synchronous =
    /// NORMAL`, a busy timeout instead of immediate lock errors, and
    /// foreign keys enforced so chunk rows cannot outlive their download.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the file cannot be opened or
    /// the schema cannot be applied.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Self::with_schema(pool).await
    }

    /// Opens a private in-memory database; used by tests.
    ///
    /// Capped at one connection: every in-memory connection is its own
    /// database, so a second one would see empty tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the schema cannot be applied.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_schema(pool).await
    }

    async fn with_schema(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Persists a new download together with all of its chunk rows in one
    /// transaction, assigning `download.id` and every `chunk.id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any insert fails; the
    /// transaction is rolled back and nothing is persisted.
    #[instrument(skip(self, download), fields(url = %download.url))]
    pub async fn insert_download(&self, download: &mut Download) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: (i64,) = sqlx::query_as(
            r"INSERT INTO downloads (url, path, size, chunks, workers, state)
              VALUES (?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(&download.url)
        .bind(download.path.to_string_lossy().into_owned())
        .bind(download.size)
        .bind(i64::from(download.chunk_count))
        .bind(i64::from(download.worker_count))
        .bind(download.state.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        download.id = row.0;

        for chunk in &mut download.chunks {
            let row: (i64,) = sqlx::query_as(
                r"INSERT INTO chunks (download_id, chunk_index, start_byte, end_byte, written, state)
                  VALUES (?, ?, ?, ?, ?, ?)
                  RETURNING id",
            )
            .bind(download.id)
            .bind(i64::from(chunk.index))
            .bind(chunk.start_byte)
            .bind(chunk.end_byte)
            .bind(chunk.written)
            .bind(chunk.state.as_i64())
            .fetch_one(&mut *tx)
            .await?;
            chunk.id = row.0;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Overwrites a chunk's `(state, written)`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, chunk), fields(chunk_id = chunk.id))]
    pub async fn update_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query("UPDATE chunks SET state = ?, written = ? WHERE id = ?")
            .bind(chunk.state.as_i64())
            .bind(chunk.written)
            .bind(chunk.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transitions a download's persisted state and, in the same
    /// transaction, snapshots `(state, written)` onto every chunk that is
    /// not already completed. This is the pause/resume/cancel snapshot
    /// pathway, so restart sees the latest byte counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any statement fails; the
    /// transaction is rolled back.
    #[instrument(skip(self, chunks))]
    pub async fn update_download_state(
        &self,
        download_id: i64,
        state: DownloadState,
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE downloads SET state = ? WHERE id = ?")
            .bind(state.as_i64())
            .bind(download_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            if chunk.state == DownloadState::Completed {
                continue;
            }
            sqlx::query("UPDATE chunks SET state = ?, written = ? WHERE id = ?")
                .bind(state.as_i64())
                .bind(chunk.written)
                .bind(chunk.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Looks up a persisted download by `(url, path)`, with its chunks
    /// ordered by index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure or
    /// [`StoreError::InvalidRow`] when stored values fail to parse.
    #[instrument(skip(self, path), fields(url = %url))]
    pub async fn find_download(&self, url: &str, path: &Path) -> Result<Option<Download>> {
        let row: Option<DownloadRow> = sqlx::query_as(
            "SELECT id, url, path, size, chunks, workers, state
             FROM downloads WHERE url = ? AND path = ?",
        )
        .bind(url)
        .bind(path.to_string_lossy().into_owned())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let chunks = self.chunks_for(row.id).await?;
        row.into_download(chunks).map(Some)
    }

    /// Returns every persisted download, ordered by id, each with its
    /// chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure or
    /// [`StoreError::InvalidRow`] when stored values fail to parse.
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Download>> {
        let rows: Vec<DownloadRow> = sqlx::query_as(
            "SELECT id, url, path, size, chunks, workers, state
             FROM downloads ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut downloads = Vec::with_capacity(rows.len());
        for row in rows {
            let chunks = self.chunks_for(row.id).await?;
            downloads.push(row.into_download(chunks)?);
        }
        Ok(downloads)
    }

    async fn chunks_for(&self, download_id: i64) -> Result<Vec<Chunk>> {
        let rows: Vec<ChunkRow> = sqlx::query_as(
            "SELECT id, chunk_index, start_byte, end_byte, written, state
             FROM chunks WHERE download_id = ? ORDER BY chunk_index",
        )
        .bind(download_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }
}
