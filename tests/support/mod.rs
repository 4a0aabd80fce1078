//! Shared helpers for integration tests: a Range-aware mock responder and
//! polling utilities.

#![allow(dead_code)]

use std::time::Duration;

use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use swiftdl::{DownloadManager, DownloadState};

/// Deterministic non-repeating byte pattern for download bodies.
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Responder serving real `206 Partial Content` slices for `Range`
/// requests, or the whole body with `200 OK` when no range is present.
pub struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    /// Delays every response; used to keep transfers in flight long enough
    /// for pause/cancel tests to interrupt them.
    pub fn with_delay(body: Vec<u8>, delay: Duration) -> Self {
        Self {
            body,
            delay: Some(delay),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len();
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range);

        let template = match range {
            Some((start, end)) if start < total => {
                let end = end.min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header("Content-Range", format!("bytes {start}-{end}/{total}"))
                    .set_body_bytes(self.body[start..=end].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let range = value.strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Mounts a range-capable file at `route`: HEAD reports the size, GET
/// serves ranged slices.
pub async fn mount_range_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("HEAD"))
        .and(url_path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(url_path(route))
        .respond_with(RangeResponder::new(body))
        .mount(server)
        .await;
}

/// Like [`mount_range_file`] but with a per-response delay on GETs.
pub async fn mount_slow_range_file(
    server: &MockServer,
    route: &str,
    body: Vec<u8>,
    delay: Duration,
) {
    Mock::given(method("HEAD"))
        .and(url_path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(url_path(route))
        .respond_with(RangeResponder::with_delay(body, delay))
        .mount(server)
        .await;
}

/// Polls until the download reaches `state`; panics after 15 seconds.
pub async fn wait_for_state(manager: &DownloadManager, id: i64, state: DownloadState) {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let all = manager.all_downloads().await;
            if all
                .iter()
                .any(|download| download.id == id && download.state == state)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for download {id} to reach {state}"));
}

/// Polls until no coordinator run is live; panics after 15 seconds.
pub async fn wait_until_idle(manager: &DownloadManager) {
    tokio::time::timeout(Duration::from_secs(15), async {
        while !manager.idle().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for manager to become idle");
}
