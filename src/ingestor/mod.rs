//! Pipeline stages, leaves first: acquisition, parsing, description
//! decomposition, channel classification and batched persistence.

pub mod acquire;
pub mod classifier;
pub mod description;
pub mod parser;
pub mod writer;

pub use acquire::{AcquireReport, AcquiredFeed, FeedAcquirer, FeedOrigin};
pub use classifier::classify;
pub use description::decompose;
pub use parser::{EpgParser, ParseReport, ParsedGuide};
pub use writer::{BatchWriter, ChannelWriteReport, CommitFailure, CuratedReport, WriteReport};
