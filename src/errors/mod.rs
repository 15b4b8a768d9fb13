//! Centralized error handling for the EPG ingestion pipeline
//!
//! Only two conditions abort a run: the feed could not be obtained from either
//! the cache or the network ([`AppError::SourceUnavailable`]), or the feed body
//! could not be decoded/parsed ([`AppError::MalformedFeed`]). Everything else
//! that goes wrong mid-run (orphan programmes, failed cache uploads, missing
//! channel ids, failed chunk commits) is counted in the stage reports instead
//! of being raised.
//!
//! # Usage
//!
//! ```rust
//! use epg_ingest::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::malformed_feed("unexpected end of document"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for store-level Results
pub type StorageResult<T> = Result<T, StorageError>;
