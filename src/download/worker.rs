//! Chunk workers: queue consumers running the per-chunk download routine.
//!
//! A worker is bound to one coordinator run. It pulls chunk indices from the
//! run's bounded queue until the queue is closed and drained, or until the
//! run's cancellation token fires. The per-chunk routine re-syncs progress
//! from the part file on disk before fetching, which makes it tolerant to a
//! prior crash or pause.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::HttpClient;
use super::error::DownloadError;
use super::model::{Download, DownloadState, part_path};
use crate::events::UpdateThrottle;
use crate::progress::ProgressSink;

/// Shared state handed to every worker of one coordinator run.
pub(crate) struct WorkerContext {
    /// The download lock; guards chunk bookkeeping only, never held across
    /// network reads or file writes.
    pub download: Arc<Mutex<Download>>,
    pub client: HttpClient,
    pub sink: Arc<dyn ProgressSink>,
    pub throttle: Arc<UpdateThrottle>,
    pub download_id: i64,
    pub url: String,
    pub target_path: PathBuf,
    pub total_size: i64,
}

/// Worker loop: drain the chunk queue, exit on close or cancellation.
pub(crate) async fn run_worker(
    ctx: Arc<WorkerContext>,
    queue: Arc<Mutex<mpsc::Receiver<u32>>>,
    token: CancellationToken,
) {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                () = token.cancelled() => None,
                item = queue.recv() => item,
            }
        };
        let Some(index) = next else { break };

        match download_chunk(&ctx, index, &token).await {
            Ok(()) => debug!(chunk = index, "chunk finished"),
            Err(DownloadError::Cancelled) => debug!(chunk = index, "chunk interrupted"),
            Err(error) => warn!(chunk = index, error = %error, "chunk download failed"),
        }
    }
}

/// Downloads one chunk into its part file, resuming from whatever prefix
/// already survives on disk.
///
/// Progress is advanced only after bytes are flushed to the OS, so the part
/// file length never trails the persisted `written` value.
pub(crate) async fn download_chunk(
    ctx: &WorkerContext,
    index: u32,
    token: &CancellationToken,
) -> Result<(), DownloadError> {
    let slot = index as usize;

    let (start_byte, end_byte, state) = {
        let download = ctx.download.lock().await;
        let chunk = &download.chunks[slot];
        (chunk.start_byte, chunk.end_byte, chunk.state)
    };
    if state == DownloadState::Completed {
        return Ok(());
    }
    let chunk_len = end_byte - start_byte + 1;
    let part = part_path(&ctx.target_path, index);

    // Reconcile in-memory progress with what actually survived any prior
    // crash or pause.
    let disk_len = match tokio::fs::metadata(&part).await {
        Ok(meta) => Some(i64::try_from(meta.len()).unwrap_or(i64::MAX)),
        Err(_) => None,
    };
    let written = {
        let mut download = ctx.download.lock().await;
        if let Some(len) = disk_len {
            download.chunks[slot].written = len;
        }
        download.chunks[slot].written
    };

    if written >= chunk_len {
        complete_chunk(ctx, slot).await;
        return Ok(());
    }

    // The chunk may still be marked paused from an earlier run.
    {
        let mut download = ctx.download.lock().await;
        download.chunks[slot].state = DownloadState::Active;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&part)
        .await
        .map_err(|e| DownloadError::io(&part, e))?;
    file.seek(SeekFrom::Start(u64::try_from(written).unwrap_or_default()))
        .await
        .map_err(|e| DownloadError::io(&part, e))?;

    let range_start = start_byte + written;
    let response = tokio::select! {
        () = token.cancelled() => {
            pause_chunk(ctx, slot).await;
            return Err(DownloadError::Cancelled);
        }
        response = ctx.client.get_range(&ctx.url, range_start, end_byte) => response?,
    };

    // A plain 200 means the server ignored the range; the requested byte
    // window is honored here instead.
    let mut skip = if response.status() == StatusCode::OK {
        range_start
    } else {
        0
    };
    let mut remaining = chunk_len - written;
    let mut stream = response.bytes_stream();

    loop {
        let frame = tokio::select! {
            () = token.cancelled() => {
                pause_chunk(ctx, slot).await;
                return Err(DownloadError::Cancelled);
            }
            next = stream.next() => next,
        };
        let mut bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(error)) => return Err(DownloadError::network(&ctx.url, error)),
            None => break,
        };

        if skip > 0 {
            let discard = skip.min(i64::try_from(bytes.len()).unwrap_or_default());
            bytes = bytes.slice(usize::try_from(discard).unwrap_or_default()..);
            skip -= discard;
        }
        if i64::try_from(bytes.len()).unwrap_or_default() > remaining {
            bytes = bytes.slice(..usize::try_from(remaining).unwrap_or_default());
        }
        if bytes.is_empty() {
            continue;
        }

        file.write_all(&bytes)
            .await
            .map_err(|e| DownloadError::io(&part, e))?;
        file.flush()
            .await
            .map_err(|e| DownloadError::io(&part, e))?;

        let delta = i64::try_from(bytes.len()).unwrap_or_default();
        remaining -= delta;
        record_progress(ctx, slot, delta).await;

        if remaining == 0 {
            break;
        }
    }

    complete_chunk(ctx, slot).await;
    Ok(())
}

/// Advances `written` under the download lock, persists the chunk row, and
/// emits a throttled progress event.
async fn record_progress(ctx: &WorkerContext, slot: usize, delta: i64) {
    let download = &mut *ctx.download.lock().await;
    download.chunks[slot].written += delta;
    let snapshot = download.chunks[slot].clone();

    if let Err(error) = ctx.sink.update_chunk(&snapshot).await {
        warn!(
            download_id = ctx.download_id,
            chunk = snapshot.index,
            error = %error,
            "failed to persist chunk progress"
        );
    }
    if ctx.throttle.should_emit() {
        ctx.sink
            .notify_chunk(ctx.download_id, ctx.total_size, &snapshot);
    }
}

/// Transitions the chunk to completed (once), bumps the completed counter,
/// persists, and emits.
async fn complete_chunk(ctx: &WorkerContext, slot: usize) {
    let download = &mut *ctx.download.lock().await;
    // Completed is idempotent; cancelled is terminal and never leaves.
    if matches!(
        download.chunks[slot].state,
        DownloadState::Completed | DownloadState::Cancelled
    ) {
        return;
    }
    download.chunks[slot].state = DownloadState::Completed;
    download.completed_chunks += 1;
    let snapshot = download.chunks[slot].clone();

    if let Err(error) = ctx.sink.update_chunk(&snapshot).await {
        warn!(
            download_id = ctx.download_id,
            chunk = snapshot.index,
            error = %error,
            "failed to persist chunk completion"
        );
    }
    if ctx.throttle.should_emit() {
        ctx.sink
            .notify_chunk(ctx.download_id, ctx.total_size, &snapshot);
    }
}

/// Transitions an interrupted chunk to paused, persists, and emits.
async fn pause_chunk(ctx: &WorkerContext, slot: usize) {
    let download = &mut *ctx.download.lock().await;
    if download.chunks[slot].state != DownloadState::Active {
        return;
    }
    download.chunks[slot].state = DownloadState::Paused;
    let snapshot = download.chunks[slot].clone();

    if let Err(error) = ctx.sink.update_chunk(&snapshot).await {
        warn!(
            download_id = ctx.download_id,
            chunk = snapshot.index,
            error = %error,
            "failed to persist chunk pause"
        );
    }
    if ctx.throttle.should_emit() {
        ctx.sink
            .notify_chunk(ctx.download_id, ctx.total_size, &snapshot);
    }
}
