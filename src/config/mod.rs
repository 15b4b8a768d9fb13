use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::utils::url::UrlUtils;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Daily feed location used by incremental refreshes
    #[serde(default = "default_feed_url")]
    pub url: String,
    /// Canonical (possibly multi-day, gzip) source used by full rebuilds.
    /// Falls back to `url` when unset.
    #[serde(default)]
    pub canonical_url: Option<String>,
    /// Bound on a single feed HTTP request
    #[serde(default = "default_feed_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,
    /// Object-store prefix under which cached feeds are kept
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_directory: PathBuf,
    /// Secret mixed into signed object URLs
    #[serde(default)]
    pub signing_secret: String,
    /// Base URL under which stored objects are served
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Mutations per commit; clamped to the store cap
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Documents per page for paginated reads and purges
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Characters kept in a program's normalized description
    #[serde(default = "default_description_limit")]
    pub description_limit: usize,
    /// Copy classified channels into the curated collections after a rebuild
    #[serde(default = "default_curate_after_rebuild")]
    pub curate_after_rebuild: bool,
    #[serde(default)]
    pub collections: CollectionNames,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionNames {
    #[serde(default = "default_channels_collection")]
    pub channels: String,
    #[serde(default = "default_programs_collection")]
    pub programs: String,
    #[serde(default = "default_curated_channels_collection")]
    pub curated_channels: String,
    #[serde(default = "default_curated_programs_collection")]
    pub curated_programs: String,
}

// Feed defaults
fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(DEFAULT_FEED_TIMEOUT_SECS)
}

fn default_cache_prefix() -> String {
    DEFAULT_CACHE_PREFIX.to_string()
}

// Storage defaults
fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

fn default_signed_url_ttl() -> u64 {
    DEFAULT_SIGNED_URL_TTL_MINUTES
}

// Database defaults
fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

// Pipeline defaults
fn default_batch_size() -> usize {
    MAX_BATCH_OPERATIONS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_description_limit() -> usize {
    DEFAULT_DESCRIPTION_LIMIT
}

fn default_curate_after_rebuild() -> bool {
    DEFAULT_CURATE_AFTER_REBUILD
}

fn default_channels_collection() -> String {
    DEFAULT_CHANNELS_COLLECTION.to_string()
}

fn default_programs_collection() -> String {
    DEFAULT_PROGRAMS_COLLECTION.to_string()
}

fn default_curated_channels_collection() -> String {
    DEFAULT_CURATED_CHANNELS_COLLECTION.to_string()
}

fn default_curated_programs_collection() -> String {
    DEFAULT_CURATED_PROGRAMS_COLLECTION.to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            canonical_url: None,
            timeout: default_feed_timeout(),
            cache_prefix: default_cache_prefix(),
        }
    }
}

impl FeedConfig {
    /// Source fetched by a full rebuild
    pub fn canonical_url(&self) -> &str {
        self.canonical_url.as_deref().unwrap_or(&self.url)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_directory: default_storage_path(),
            signing_secret: String::new(),
            public_base_url: None,
            signed_url_ttl_minutes: default_signed_url_ttl(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            description_limit: default_description_limit(),
            curate_after_rebuild: default_curate_after_rebuild(),
            collections: CollectionNames::default(),
        }
    }
}

impl PipelineConfig {
    /// Batch size actually used for commits (never above the store cap)
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_OPERATIONS)
    }
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            channels: default_channels_collection(),
            programs: default_programs_collection(),
            curated_channels: default_curated_channels_collection(),
            curated_programs: default_curated_programs_collection(),
        }
    }
}

impl CollectionNames {
    /// Every collection a full rebuild purges
    pub fn all(&self) -> [&str; 4] {
        [
            &self.channels,
            &self.programs,
            &self.curated_channels,
            &self.curated_programs,
        ]
    }
}

impl Config {
    /// Load configuration from a TOML file, overlaid with `EPG_INGEST_*`
    /// environment variables (`__` separates nested keys). A missing file is
    /// created with the defaults.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("EPG_INGEST_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed.url.trim().is_empty() {
            bail!("feed.url must not be empty");
        }
        UrlUtils::parse_http(&self.feed.url).map_err(anyhow::Error::msg)?;
        if let Some(canonical) = &self.feed.canonical_url {
            UrlUtils::parse_http(canonical).map_err(anyhow::Error::msg)?;
        }
        if self.pipeline.batch_size == 0 {
            bail!("pipeline.batch_size must be greater than zero");
        }
        if self.pipeline.page_size == 0 {
            bail!("pipeline.page_size must be greater than zero");
        }
        if self.feed.cache_prefix.contains("..") {
            bail!("feed.cache_prefix must not contain '..'");
        }
        Ok(())
    }
}
