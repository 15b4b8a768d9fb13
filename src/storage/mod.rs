//! Storage backends for cached feed blobs and persisted documents

pub mod document_store;
pub mod local;
mod migrations;
pub mod object_store;
pub mod sql;

pub use document_store::{
    Document, DocumentStore, Fields, Filter, MemoryDocumentStore, Page, WriteOp, query_all,
};
pub use local::LocalObjectStore;
pub use object_store::{ByteStream, CONTENT_TYPE_XML, MemoryObjectStore, ObjectStore};
pub use sql::SqlDocumentStore;
