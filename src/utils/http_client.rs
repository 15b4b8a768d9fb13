//! Feed transport
//!
//! [`FeedSource`] is the seam between the acquirer and the network. The
//! production implementation wraps a `reqwest` client with the configured
//! request timeout; tests substitute canned payloads.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::storage::ByteStream;
use crate::utils::url::UrlUtils;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the whole (possibly compressed) body
    async fn fetch(&self, url: &str) -> AppResult<Bytes>;

    /// Open a streaming GET; chunks are pulled on demand
    async fn open_stream(&self, url: &str) -> AppResult<ByteStream>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("epg-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> AppResult<Response> {
        debug!("Requesting feed from {}", UrlUtils::obfuscate_credentials(url));

        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::source_unavailable(UrlUtils::obfuscate_credentials(&e.to_string()))
        })?;

        if !response.status().is_success() {
            return Err(AppError::source_unavailable(format!(
                "HTTP error: {} {} - URL: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown"),
                UrlUtils::obfuscate_credentials(url)
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> AppResult<Bytes> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| AppError::source_unavailable(format!("Failed to read response: {e}")))?;
        debug!("Fetched {} bytes of raw feed content", bytes.len());
        Ok(bytes)
    }

    async fn open_stream(&self, url: &str) -> AppResult<ByteStream> {
        let response = self.get(url).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| {
                    AppError::source_unavailable(format!("Feed stream interrupted: {e}"))
                })
            })
            .boxed())
    }
}
