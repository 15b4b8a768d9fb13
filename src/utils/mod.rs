//! Utility modules shared across the pipeline

pub mod decompression;
pub mod http_client;
pub mod text;
pub mod time;
pub mod url;

pub use decompression::{CompressionFormat, DecompressionService};
pub use http_client::{FeedSource, HttpFeedSource};
