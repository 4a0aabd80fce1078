//! HTTP client wrapper for size discovery and ranged chunk fetches.
//!
//! This module provides the `HttpClient` struct which issues the HEAD size
//! probe and the `Range` GETs the chunk workers stream from. One client is
//! created per download and shared by all of its workers so the connection
//! pool is reused across chunk fetches.

use std::time::Duration;

use reqwest::header::{CONNECTION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, MAX_IDLE_PER_HOST, POOL_IDLE_TIMEOUT_SECS, READ_TIMEOUT_SECS,
};
use super::error::DownloadError;

/// HTTP client for ranged downloads with keep-alive pooling.
///
/// Configuration mirrors the transport the workers depend on: up to
/// [`MAX_IDLE_PER_HOST`] idle connections per host, a 90 second idle
/// timeout, and HTTP/2 when the server negotiates it via ALPN.
///
/// # Example
///
/// ```no_run
/// use swiftdl::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let size = client.probe_size("https://example.com/file.bin").await?;
/// let response = client.get_range("https://example.com/file.bin", 0, size - 1).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Discovers the resource size via a HEAD request.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for malformed URLs,
    /// [`DownloadError::SizeDiscovery`] when the server answers with a
    /// status other than 200, and [`DownloadError::MissingLength`] when no
    /// positive `Content-Length` is reported (chunked-transfer servers are
    /// rejected here).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe_size(&self, url: &str) -> Result<i64, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::size_discovery(url, status.as_u16()));
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| DownloadError::missing_length(url))?;

        debug!(size, "size discovered");
        Ok(size)
    }

    /// Issues a ranged GET for `[start, end]` (inclusive).
    ///
    /// Sends `Range: bytes=<start>-<end>` and `Connection: close`. A
    /// `206 Partial Content` is the normal answer; a plain `200 OK` means
    /// the server ignored the range and the caller must discard bytes
    /// outside the requested window.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] for transport failures and
    /// [`DownloadError::RangeStatus`] for any status other than 200/206.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_range(
        &self,
        url: &str,
        start: i64,
        end: i64,
    ) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT | StatusCode::OK => Ok(response),
            status => Err(DownloadError::range_status(url, status.as_u16(), start, end)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_probe_size_reads_content_length() {
        let mock_server = MockServer::start().await;

        // A HEAD for a bodied response carries its Content-Length; the body
        // itself is stripped by the server.
        Mock::given(method("HEAD"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 512]))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/file.bin", mock_server.uri());
        let size = client.probe_size(&url).await.unwrap();
        assert_eq!(size, 512);
    }

    #[tokio::test]
    async fn test_probe_size_rejects_non_200() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/missing.bin", mock_server.uri());
        let result = client.probe_size(&url).await;
        match result {
            Err(DownloadError::SizeDiscovery { status: 404, .. }) => {}
            other => panic!("Expected SizeDiscovery 404, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_size_rejects_missing_length() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/stream", mock_server.uri());
        let result = client.probe_size(&url).await;
        match result {
            Err(DownloadError::MissingLength { .. }) => {}
            // Some HTTP stacks report a zero Content-Length for empty HEAD
            // bodies, which is rejected through the same variant.
            other => panic!("Expected MissingLength, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_size_invalid_url() {
        let client = HttpClient::new();
        let result = client.probe_size("not-a-valid-url").await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_get_range_sends_range_and_connection_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .and(header("Range", "bytes=100-199"))
            .and(header("Connection", "close"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 100]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/file.bin", mock_server.uri());
        let response = client.get_range(&url, 100, 199).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[tokio::test]
    async fn test_get_range_accepts_plain_200() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/no-ranges.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 300]))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/no-ranges.bin", mock_server.uri());
        let response = client.get_range(&url, 0, 99).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_range_rejects_other_statuses() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/error.bin"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/error.bin", mock_server.uri());
        let result = client.get_range(&url, 0, 9).await;
        match result {
            Err(DownloadError::RangeStatus {
                status: 500,
                start: 0,
                end: 9,
                ..
            }) => {}
            other => panic!("Expected RangeStatus 500, got: {other:?}"),
        }
    }
}
