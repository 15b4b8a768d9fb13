pub mod config;
pub mod entities;
pub mod errors;
pub mod ingestor;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;
