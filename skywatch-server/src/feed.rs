//! State-vector feed clients.
//!
//! `HttpFeed` queries an OpenSky-compatible `/states/all` endpoint once per
//! bounding box; `ReplayFeed` serves a saved response from disk. The engine
//! applies the per-tick timeout around either.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use skywatch_core::state_vector::{decode_payload, FeedPayload};
use skywatch_core::BoundingBox;

/// Connect timeout for the HTTP client; the overall deadline comes from the engine.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed feed response: {0}")]
    Decode(String),
}

/// Source of raw state vectors for a set of query boxes.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError>;
}

// ---------------------------------------------------------------------------
// HTTP feed
// ---------------------------------------------------------------------------

/// Anonymous GET against `{base_url}/states/all`.
#[derive(Clone)]
pub struct HttpFeed {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFeed {
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("skywatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(HttpFeed {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn states_url(&self) -> String {
        format!("{}/states/all", self.base_url)
    }
}

impl HttpFeed {
    async fn fetch_box(&self, bbox: &BoundingBox) -> Result<FeedPayload, FeedError> {
        let url = self.states_url();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lamin", bbox.lamin),
                ("lamax", bbox.lamax),
                ("lomin", bbox.lomin),
                ("lomax", bbox.lomax),
            ])
            .send()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Http(format!("failed to read response: {e}")))?;

        tracing::debug!(url = %url, bytes = body.len(), "feed response");
        decode_payload(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    /// One request per box; records are concatenated in box order. Any
    /// failing request fails the whole fetch.
    async fn fetch(&self, boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError> {
        let mut merged = FeedPayload::default();
        for bbox in boxes {
            let part = self.fetch_box(bbox).await?;
            merged.time = match (merged.time, part.time) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            merged.records.extend(part.records);
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Replay feed
// ---------------------------------------------------------------------------

/// Serves a saved `/states/all` response. The file is re-read on every fetch.
pub struct ReplayFeed {
    path: PathBuf,
}

impl ReplayFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ReplayFeed { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for ReplayFeed {
    async fn fetch(&self, _boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError> {
        let body = tokio::fs::read(&self.path)
            .await
            .map_err(|e| FeedError::Http(format!("{}: {e}", self.path.display())))?;
        decode_payload(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
