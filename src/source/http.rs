//! HTTP Frame Source
//!
//! Talks to a trajectory server exposing two endpoints:
//!
//! - `GET {base}/metadata` returning `{"frameCount": n}`
//! - `GET {base}/frames?start=a&end=b` returning a length-prefixed frame
//!   container

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::FrameSource;
use crate::codec::{self, WireFormat};
use crate::error::{Error, Result};
use crate::frame::{Frame, Metadata};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP source
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Server base URL, e.g. `http://localhost:8080/trajectories/run-1`
    pub base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// HTTP Source
// =============================================================================

/// Frame source backed by an HTTP trajectory server
pub struct HttpFrameSource {
    config: HttpSourceConfig,
    client: Client,
}

impl HttpFrameSource {
    /// Create a new HTTP source
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Server base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn metadata_url(&self) -> String {
        format!("{}/metadata", self.base_url())
    }

    fn frames_url(&self, start: u64, end: u64) -> String {
        format!(
            "{}/frames?start={}&end={}",
            self.base_url(),
            urlencoding::encode(&start.to_string()),
            urlencoding::encode(&end.to_string())
        )
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Source(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    #[instrument(skip(self), fields(base = %self.base_url()))]
    async fn get_metadata(&self) -> Result<Metadata> {
        let url = self.metadata_url();
        let metadata: Metadata = self
            .fetch(&url)
            .await?
            .json()
            .await
            .map_err(|e| Error::Source(format!("invalid metadata from {}: {}", url, e)))?;

        debug!(frame_count = metadata.frame_count, "Fetched metadata");
        Ok(metadata)
    }

    #[instrument(skip(self), fields(base = %self.base_url()))]
    async fn get_frames(&self, start: u64, end: u64) -> Result<Vec<Frame>> {
        let url = self.frames_url(start, end);
        let body = self
            .fetch(&url)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Source(format!("reading body of {} failed: {}", url, e)))?;

        let frames = codec::decode(&body, WireFormat::LengthPrefixed)?;
        debug!(
            requested = end.saturating_sub(start),
            received = frames.len(),
            bytes = body.len(),
            "Fetched frames"
        );
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn source(base: &str) -> HttpFrameSource {
        HttpFrameSource::new(HttpSourceConfig {
            base_url: base.to_string(),
            request_timeout: Duration::from_millis(200),
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let src = source("http://example.test/traj/");
        assert_eq!(src.base_url(), "http://example.test/traj");
        assert_eq!(src.metadata_url(), "http://example.test/traj/metadata");
        assert_eq!(
            src.frames_url(100, 200),
            "http://example.test/traj/frames?start=100&end=200"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_source_error() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let src = source("http://127.0.0.1:9");
        assert_matches!(src.get_metadata().await, Err(Error::Source(_)));
        assert_matches!(src.get_frames(0, 1).await, Err(Error::Source(_)));
    }
}
