//! Manager-level scenarios: duplicate adds, restart rehydration, and
//! resume-from-part-file behavior.

mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use swiftdl::{
    Download, DownloadManager, DownloadState, DownloadStore, ManagerOptions, part_path,
    plan_chunks,
};

use support::{RangeResponder, mount_range_file, pattern_bytes, wait_for_state};

async fn manager_in(dir: &Path) -> Arc<DownloadManager> {
    let store = store_in(dir).await;
    let options = ManagerOptions {
        update_period: Duration::from_millis(5),
        ..ManagerOptions::default()
    };
    Arc::new(DownloadManager::new(store, options))
}

async fn store_in(dir: &Path) -> DownloadStore {
    DownloadStore::open(&dir.join("downloads.db"))
        .await
        .expect("failed to open database")
}

#[tokio::test]
async fn test_duplicate_add_attaches_without_second_head() {
    let body = pattern_bytes(2048);
    let server = MockServer::start().await;

    // Exactly one HEAD for the whole test: the duplicate add must attach to
    // the persisted record instead of probing again.
    Mock::given(method("HEAD"))
        .and(url_path("/d.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(url_path("/d.bin"))
        .respond_with(RangeResponder::with_delay(
            body.clone(),
            Duration::from_millis(200),
        ))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("d.bin");
    let manager = manager_in(temp_dir.path()).await;

    let url = format!("{}/d.bin", server.uri());
    let first = manager.add_download(&url, &target, 4, 2).await.unwrap();
    let second = manager.add_download(&url, &target, 4, 2).await.unwrap();

    assert_eq!(first, second, "duplicate add must reuse the same record");

    // No extra chunk rows were created by the second add.
    let stored = store_in(temp_dir.path()).await.list_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].chunks.len(), 4);

    wait_for_state(&manager, first, DownloadState::Completed).await;
    let assembled = tokio::fs::read(&target).await.unwrap();
    assert_eq!(assembled, body);
}

#[tokio::test]
async fn test_cold_restart_resumes_from_part_file_lengths() {
    let body = pattern_bytes(1200);
    let server = MockServer::start().await;
    mount_range_file(&server, "/r.bin", body.clone()).await;

    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("r.bin");
    let url = format!("{}/r.bin", server.uri());

    // Simulate a process killed mid-download: persisted rows carry stale
    // byte counts while the part files hold what actually reached disk.
    // Chunks of 300 bytes; chunk 0 holds half, chunk 2 is fully on disk.
    {
        let store = store_in(temp_dir.path()).await;
        let mut download = Download {
            id: 0,
            url: url.clone(),
            path: target.clone(),
            size: 1200,
            chunk_count: 4,
            worker_count: 2,
            state: DownloadState::Active,
            completed_chunks: 0,
            chunks: plan_chunks(1200, 4),
        };
        download.chunks[0].written = 100; // stale: disk has 150
        download.chunks[2].written = 100; // stale: disk has all 300
        store.insert_download(&mut download).await.unwrap();

        tokio::fs::write(part_path(&target, 0), &body[0..150])
            .await
            .unwrap();
        tokio::fs::write(part_path(&target, 2), &body[600..900])
            .await
            .unwrap();
    }

    // "Restart": a fresh manager over the same database auto-starts the
    // incomplete download.
    let manager = manager_in(temp_dir.path()).await;
    manager.load_from_store().await.unwrap();

    let stored = store_in(temp_dir.path()).await.list_all().await.unwrap();
    let id = stored[0].id;
    wait_for_state(&manager, id, DownloadState::Completed).await;

    let assembled = tokio::fs::read(&target).await.unwrap();
    assert_eq!(assembled, body, "restart must reproduce the exact bytes");

    // Each resumed chunk fetched from its on-disk offset, not the stale
    // persisted count; the fully-written chunk was not fetched at all.
    let requests = server.received_requests().await.unwrap();
    let ranges: Vec<String> = requests
        .iter()
        .filter(|request| request.method.as_str() == "GET")
        .filter_map(|request| request.headers.get("range"))
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect();

    assert!(
        ranges.contains(&"bytes=150-299".to_string()),
        "chunk 0 must resume from the part-file length, got: {ranges:?}"
    );
    assert!(
        !ranges.iter().any(|range| range.starts_with("bytes=6")),
        "fully-written chunk 2 must not be fetched, got: {ranges:?}"
    );

    let stored = store_in(temp_dir.path()).await.list_all().await.unwrap();
    assert_eq!(stored[0].state, DownloadState::Completed);
    assert!(
        stored[0]
            .chunks
            .iter()
            .all(|chunk| chunk.state == DownloadState::Completed)
    );
}

#[tokio::test]
async fn test_restart_registers_terminal_downloads_without_starting() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = store_in(temp_dir.path()).await;
        let mut cancelled = Download {
            id: 0,
            url: "https://example.com/old.bin".to_string(),
            path: temp_dir.path().join("old.bin"),
            size: 100,
            chunk_count: 1,
            worker_count: 1,
            state: DownloadState::Cancelled,
            completed_chunks: 0,
            chunks: plan_chunks(100, 1),
        };
        cancelled.chunks[0].state = DownloadState::Cancelled;
        store.insert_download(&mut cancelled).await.unwrap();
    }

    let manager = manager_in(temp_dir.path()).await;
    manager.load_from_store().await.unwrap();

    let all = manager.all_downloads().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].state, DownloadState::Cancelled);
    assert!(
        manager.idle().await,
        "terminal downloads must not be started"
    );
}
