//! Feed acquisition
//!
//! A day's feed is served from the object-store cache when present and
//! otherwise fetched from the network, decompressed and written back to the
//! cache on a best-effort basis. Full rebuilds instead stream the canonical
//! source straight through a gzip decoder into the store.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::config::defaults::CANONICAL_FEED_NAME;
use crate::errors::{AppError, AppResult, StorageError};
use crate::models::DayKey;
use crate::storage::{CONTENT_TYPE_XML, ObjectStore};
use crate::utils::url::UrlUtils;
use crate::utils::{DecompressionService, FeedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeedOrigin {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquireReport {
    pub origin: FeedOrigin,
    /// Object-store path the feed was read from or cached to
    pub path: String,
    /// Size of the decompressed document
    pub bytes: u64,
    /// Why caching a freshly fetched feed failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AcquiredFeed {
    pub xml: String,
    pub report: AcquireReport,
}

pub struct FeedAcquirer {
    objects: Arc<dyn ObjectStore>,
    source: Arc<dyn FeedSource>,
    config: FeedConfig,
}

impl FeedAcquirer {
    pub fn new(objects: Arc<dyn ObjectStore>, source: Arc<dyn FeedSource>, config: FeedConfig) -> Self {
        Self {
            objects,
            source,
            config,
        }
    }

    pub fn cache_path(&self, day: DayKey) -> String {
        day.cache_path(&self.config.cache_prefix)
    }

    pub fn canonical_path(&self) -> String {
        let prefix = self.config.cache_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            CANONICAL_FEED_NAME.to_string()
        } else {
            format!("{prefix}/{CANONICAL_FEED_NAME}")
        }
    }

    /// Feed document for `day`, from the cache or the network
    pub async fn acquire(&self, day: DayKey) -> AppResult<AcquiredFeed> {
        let path = self.cache_path(day);

        let cache_miss = match self.objects.download(&path).await {
            Ok(bytes) => {
                debug!("Serving feed for {} from cache at {}", day, path);
                let xml = decode_feed(bytes)?;
                return Ok(AcquiredFeed {
                    report: AcquireReport {
                        origin: FeedOrigin::Cache,
                        path,
                        bytes: xml.len() as u64,
                        upload_error: None,
                    },
                    xml,
                });
            }
            Err(e) if e.is_not_found() => e,
            Err(e) => {
                warn!("Cache read for {} failed, falling back to network: {}", path, e);
                e
            }
        };

        info!(
            "No cached feed for {}, fetching {}",
            day,
            UrlUtils::obfuscate_credentials(&self.config.url)
        );
        let raw = self.source.fetch(&self.config.url).await.map_err(|e| {
            AppError::source_unavailable(format!(
                "{cache_miss}; fetching {} failed: {e}",
                UrlUtils::obfuscate_credentials(&self.config.url)
            ))
        })?;

        let xml = decode_feed(raw)?;
        let upload_error = match self
            .objects
            .upload(&path, Bytes::from(xml.clone()), CONTENT_TYPE_XML)
            .await
        {
            Ok(url) => {
                debug!("Cached feed for {} at {}", day, url);
                None
            }
            Err(e) => {
                warn!("Failed to cache feed for {} at {}: {}", day, path, e);
                Some(e.to_string())
            }
        };

        Ok(AcquiredFeed {
            report: AcquireReport {
                origin: FeedOrigin::Network,
                path,
                bytes: xml.len() as u64,
                upload_error,
            },
            xml,
        })
    }

    /// Replace the canonical blob with a fresh copy of the canonical source.
    ///
    /// The download is piped through the streaming decoder into the object
    /// store, which pulls one chunk at a time.
    pub async fn refresh_canonical(&self) -> AppResult<AcquiredFeed> {
        let path = self.canonical_path();
        let url = self.config.canonical_url();

        match self.objects.exists(&path).await {
            Ok(true) => {
                if let Err(e) = self.objects.delete(&path).await {
                    warn!("Failed to delete previous canonical feed {}: {}", path, e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check for previous canonical feed {}: {}", path, e),
        }

        info!(
            "Streaming canonical feed from {} into {}",
            UrlUtils::obfuscate_credentials(url),
            path
        );
        let stream = self
            .source
            .open_stream(url)
            .await
            .map_err(into_source_unavailable)?;
        let written = self
            .objects
            .upload_stream(
                &path,
                DecompressionService::decompress_stream(stream),
                CONTENT_TYPE_XML,
            )
            .await
            .map_err(into_source_unavailable)?;
        debug!("Materialized {} bytes of canonical feed at {}", written, path);

        let xml = decode_feed(self.objects.download(&path).await?)?;
        Ok(AcquiredFeed {
            report: AcquireReport {
                origin: FeedOrigin::Network,
                path,
                bytes: written,
                upload_error: None,
            },
            xml,
        })
    }

    /// Time-limited URL of the cached feed for `day`
    pub async fn signed_feed_url(&self, day: DayKey, ttl_minutes: u64) -> AppResult<String> {
        let path = self.cache_path(day);
        if !self.objects.exists(&path).await? {
            return Err(StorageError::not_found(path).into());
        }
        Ok(self.objects.signed_url(&path, ttl_minutes).await?)
    }
}

/// Decompress if needed and decode as UTF-8
fn decode_feed(bytes: Bytes) -> AppResult<String> {
    let bytes = DecompressionService::decompress(bytes)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| AppError::malformed_feed(format!("Feed is not valid UTF-8: {e}")))
}

/// Transport failures abort the run as an unavailable source; decoding and
/// storage failures keep their own kind
fn into_source_unavailable(e: AppError) -> AppError {
    match e {
        AppError::Http(e) => AppError::source_unavailable(e.to_string()),
        other => other,
    }
}
