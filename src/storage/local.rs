//! Filesystem-backed object store
//!
//! Objects live under a single base directory. Keys are relative, `/`
//! separated paths; absolute paths, null bytes and `..` components are
//! rejected so no key can escape the sandbox. Writes go to a temporary
//! sibling first and are renamed into place, so readers never observe a
//! half-written feed.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::object_store::{ByteStream, ObjectStore, sign_url};
use crate::errors::{AppResult, StorageError, StorageResult};

const META_SUFFIX: &str = ".meta.json";
const PARTIAL_MARKER: &str = ".partial-";

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_dir: PathBuf,
    signing_secret: String,
    public_base_url: Option<String>,
}

impl LocalObjectStore {
    /// Open (creating if needed) a store rooted at `base_dir`
    pub async fn new<P: Into<PathBuf>>(
        base_dir: P,
        signing_secret: impl Into<String>,
        public_base_url: Option<String>,
    ) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        let base_dir = base_dir.canonicalize()?;
        Ok(Self {
            base_dir,
            signing_secret: signing_secret.into(),
            public_base_url,
        })
    }

    fn validate_and_get_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::PathValidation {
                path: PathBuf::from(key),
                reason: "Object key cannot be empty".to_string(),
            });
        }

        if key.contains('\0') {
            return Err(StorageError::PathValidation {
                path: PathBuf::from(key),
                reason: "Object key contains null bytes".to_string(),
            });
        }

        let relative = Path::new(key);
        if relative.is_absolute() {
            return Err(StorageError::PathValidation {
                path: relative.to_path_buf(),
                reason: "Absolute paths not allowed - use keys relative to the store".to_string(),
            });
        }

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::PathValidation {
                path: relative.to_path_buf(),
                reason: "Object key escapes the store root".to_string(),
            });
        }

        Ok(self.base_dir.join(relative))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!("{PARTIAL_MARKER}{}", Uuid::new_v4().simple()));
        PathBuf::from(name)
    }

    fn url_base(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.base_dir.display()))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_meta(path: &Path, content_type: &str) -> StorageResult<()> {
        let meta = ObjectMeta {
            content_type: content_type.to_string(),
        };
        fs::write(Self::meta_path(path), serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn read_content_type(path: &Path) -> String {
        match fs::read(Self::meta_path(path)).await {
            Ok(raw) => serde_json::from_slice::<ObjectMeta>(&raw)
                .map(|m| m.content_type)
                .unwrap_or_else(|_| "application/octet-stream".to_string()),
            Err(_) => "application/octet-stream".to_string(),
        }
    }

    /// Stream chunks into a temp file; the caller renames it on success
    async fn write_partial(partial: &Path, mut stream: ByteStream) -> AppResult<u64> {
        let mut file = fs::File::create(partial).await.map_err(StorageError::from)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(StorageError::from)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(StorageError::from)?;
        Ok(written)
    }

    fn is_internal_file(name: &str) -> bool {
        name.ends_with(META_SUFFIX) || name.contains(PARTIAL_MARKER)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let file_path = self.validate_and_get_path(path)?;
        match fs::metadata(&file_path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, path: &str, bytes: Bytes, content_type: &str) -> StorageResult<String> {
        let file_path = self.validate_and_get_path(path)?;
        Self::ensure_parent(&file_path).await?;

        let partial = Self::partial_path(&file_path);
        if let Err(e) = fs::write(&partial, &bytes).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        fs::rename(&partial, &file_path).await?;
        Self::write_meta(&file_path, content_type).await?;

        debug!("Stored {} bytes at {}", bytes.len(), path);
        Ok(format!("{}/{}", self.url_base().trim_end_matches('/'), path))
    }

    async fn upload_stream(
        &self,
        path: &str,
        stream: ByteStream,
        content_type: &str,
    ) -> AppResult<u64> {
        let file_path = self.validate_and_get_path(path)?;
        Self::ensure_parent(&file_path).await?;

        let partial = Self::partial_path(&file_path);
        match Self::write_partial(&partial, stream).await {
            Ok(written) => {
                fs::rename(&partial, &file_path)
                    .await
                    .map_err(StorageError::from)?;
                Self::write_meta(&file_path, content_type).await?;
                debug!("Streamed {} bytes into {}", written, path);
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!("Failed to remove partial upload {}: {}", partial.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    async fn download(&self, path: &str) -> StorageResult<Bytes> {
        let file_path = self.validate_and_get_path(path)?;
        match fs::read(&file_path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let file_path = self.validate_and_get_path(path)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => {
                let _ = fs::remove_file(Self::meta_path(&file_path)).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn metadata(&self, path: &str) -> StorageResult<HashMap<String, String>> {
        let file_path = self.validate_and_get_path(path)?;
        let metadata = match fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut info = HashMap::new();
        info.insert("path".to_string(), path.to_string());
        info.insert("size".to_string(), metadata.len().to_string());
        info.insert(
            "content_type".to_string(),
            Self::read_content_type(&file_path).await,
        );
        if let Ok(modified) = metadata.modified() {
            info.insert(
                "updated".to_string(),
                DateTime::<Utc>::from(modified).to_rfc3339(),
            );
        }
        Ok(info)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![self.base_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                let Ok(relative) = entry_path.strip_prefix(&self.base_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if !Self::is_internal_file(&key) && key.starts_with(prefix) {
                    found.push(key);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn signed_url(&self, path: &str, ttl_minutes: u64) -> StorageResult<String> {
        if !self.exists(path).await? {
            return Err(StorageError::not_found(path));
        }
        sign_url(&self.url_base(), path, ttl_minutes, &self.signing_secret)
    }
}
