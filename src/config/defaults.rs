//! Configuration default values
//!
//! All default values for configuration options live here so they can be
//! changed in one place.

// Feed defaults
pub const DEFAULT_FEED_URL: &str = "https://www.tdtchannels.com/epg/TV.xml.gz";
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_CACHE_PREFIX: &str = "epg";
pub const CANONICAL_FEED_NAME: &str = "guide.xml";

// Storage defaults
pub const DEFAULT_STORAGE_PATH: &str = "./data/objects";
pub const DEFAULT_SIGNED_URL_TTL_MINUTES: u64 = 60;

// Database defaults
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./epg-ingest.db?mode=rwc";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

// Pipeline defaults
/// Hard per-commit mutation cap imposed by the document store
pub const MAX_BATCH_OPERATIONS: usize = 500;
pub const DEFAULT_PAGE_SIZE: usize = 300;
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 500;
pub const DEFAULT_CURATE_AFTER_REBUILD: bool = true;

// Collection names
pub const DEFAULT_CHANNELS_COLLECTION: &str = "channels";
pub const DEFAULT_PROGRAMS_COLLECTION: &str = "programs";
pub const DEFAULT_CURATED_CHANNELS_COLLECTION: &str = "curated_channels";
pub const DEFAULT_CURATED_PROGRAMS_COLLECTION: &str = "curated_programs";
