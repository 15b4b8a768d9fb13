//! Object store abstraction for cached feed blobs
//!
//! The pipeline only needs a handful of blob operations, plus a streaming
//! upload so a decompressed feed can be written without being buffered whole.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::errors::{AppResult, StorageError, StorageResult};

/// A pull-driven stream of byte chunks
pub type ByteStream = BoxStream<'static, AppResult<Bytes>>;

pub const CONTENT_TYPE_XML: &str = "application/xml";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Store `bytes` at `path`, replacing any previous object; returns its URL
    async fn upload(&self, path: &str, bytes: Bytes, content_type: &str) -> StorageResult<String>;

    /// Store a stream at `path`, pulling one chunk at a time. Errors yielded by
    /// the stream abort the upload and are returned unchanged; nothing is left
    /// at `path` in that case.
    async fn upload_stream(
        &self,
        path: &str,
        stream: ByteStream,
        content_type: &str,
    ) -> AppResult<u64>;

    async fn download(&self, path: &str) -> StorageResult<Bytes>;

    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Size, content type and modification time of an object
    async fn metadata(&self, path: &str) -> StorageResult<HashMap<String, String>>;

    /// Object paths starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    async fn signed_url(&self, path: &str, ttl_minutes: u64) -> StorageResult<String>;
}

/// Build a time-limited URL for `path` under `base_url`.
///
/// The signature is `sha256(secret \n path \n expires)` in hex.
pub fn sign_url(
    base_url: &str,
    path: &str,
    ttl_minutes: u64,
    secret: &str,
) -> StorageResult<String> {
    let expires = i64::try_from(ttl_minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or(StorageError::InvalidExpiry { ttl_minutes })?
        .timestamp();
    let signature = url_signature(path, expires, secret);
    Ok(format!(
        "{}/{}?expires={}&signature={}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        expires,
        signature
    ))
}

pub fn url_signature(path: &str, expires: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    updated_at: DateTime<Utc>,
}

/// In-process object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    fn check_upload(&self, path: &str) -> StorageResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("uploads disabled for {path}"),
            )));
        }
        Ok(())
    }

    fn url_for(path: &str) -> String {
        format!("memory://{path}")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn upload(&self, path: &str, bytes: Bytes, content_type: &str) -> StorageResult<String> {
        self.check_upload(path)?;
        self.objects.write().await.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(Self::url_for(path))
    }

    async fn upload_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        content_type: &str,
    ) -> AppResult<u64> {
        self.check_upload(path)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let written = buffer.len() as u64;
        self.upload(path, buffer.freeze(), content_type).await?;
        Ok(written)
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(path))
    }

    async fn metadata(&self, path: &str) -> StorageResult<HashMap<String, String>> {
        let objects = self.objects.read().await;
        let object = objects.get(path).ok_or_else(|| StorageError::not_found(path))?;
        Ok(HashMap::from([
            ("path".to_string(), path.to_string()),
            ("size".to_string(), object.bytes.len().to_string()),
            ("content_type".to_string(), object.content_type.clone()),
            ("updated".to_string(), object.updated_at.to_rfc3339()),
        ]))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn signed_url(&self, path: &str, ttl_minutes: u64) -> StorageResult<String> {
        if !self.exists(path).await? {
            return Err(StorageError::not_found(path));
        }
        sign_url("memory://", path, ttl_minutes, "memory")
    }
}
