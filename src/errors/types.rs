//! Error type definitions for the EPG ingestion pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Neither the cached blob nor the remote feed could be read
    #[error("Source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// The feed body is not decodable XML
    #[error("Malformed feed: {message}")]
    MalformedFeed { message: String },

    /// Object store or document store failures
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A run is already active on this pipeline instance
    #[error("Operation already in progress: {operation_type} on {resource}")]
    OperationInProgress {
        operation_type: String,
        resource: String,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by the object store and document store backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object or document does not exist
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// A batch exceeded the per-commit mutation cap
    #[error("Batch too large: {size} operations (max: {max})")]
    BatchTooLarge { size: usize, max: usize },

    /// The backend refused the commit as a whole
    #[error("Commit rejected on {collection}: {message}")]
    CommitRejected { collection: String, message: String },

    /// A signed URL lifetime that cannot be represented as an expiry time
    #[error("Invalid signed URL lifetime: {ttl_minutes} minutes")]
    InvalidExpiry { ttl_minutes: u64 },

    /// Path validation failed for a sandboxed object key
    #[error("Path validation failed: {path:?} - {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// Filesystem I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database errors from SeaORM
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Document (de)serialization failures
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a source-unavailable error
    pub fn source_unavailable<S: Into<String>>(message: S) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create a malformed-feed error
    pub fn malformed_feed<S: Into<String>>(message: S) -> Self {
        Self::MalformedFeed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an operation in progress error
    pub fn operation_in_progress<O: Into<String>, R: Into<String>>(
        operation_type: O,
        resource: R,
    ) -> Self {
        Self::OperationInProgress {
            operation_type: operation_type.into(),
            resource: resource.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl StorageError {
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
