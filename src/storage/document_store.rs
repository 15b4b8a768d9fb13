//! Document store abstraction
//!
//! Collections of JSON documents keyed by string id, read in id-ordered pages
//! and written through batched commits of at most
//! [`MAX_BATCH_OPERATIONS`] mutations. A commit is all-or-nothing; a commit
//! over the cap is rejected as a whole.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

pub use crate::config::defaults::MAX_BATCH_OPERATIONS;
use crate::errors::{StorageError, StorageResult};

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// A single mutation inside a batch commit
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document; fails the commit if the id exists
    Create { id: String, fields: Fields },
    /// Overwrite the given top-level fields, creating the document if needed
    Merge { id: String, fields: Fields },
    /// Replace the whole document, creating it if needed
    Replace { id: String, fields: Fields },
    Delete { id: String },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. }
            | Self::Merge { id, .. }
            | Self::Replace { id, .. }
            | Self::Delete { id } => id,
        }
    }
}

/// Query predicate over top-level fields
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::Eq { field, value } => fields.get(field) == Some(value),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Cursor for the next page; `None` once the collection is exhausted
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read up to `page_size` documents ordered by id, starting after `cursor`
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page_size: usize,
        cursor: Option<&str>,
    ) -> StorageResult<Page>;

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>>;

    async fn batch_commit(&self, collection: &str, ops: Vec<WriteOp>) -> StorageResult<()>;
}

/// Drain every page of a query
pub async fn query_all(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
    page_size: usize,
) -> StorageResult<Vec<Document>> {
    let mut documents = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store
            .query(collection, filters, page_size.max(1), cursor.as_deref())
            .await?;
        documents.extend(page.documents);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(documents)
}

fn check_batch_size(ops: &[WriteOp]) -> StorageResult<()> {
    if ops.len() > MAX_BATCH_OPERATIONS {
        return Err(StorageError::BatchTooLarge {
            size: ops.len(),
            max: MAX_BATCH_OPERATIONS,
        });
    }
    Ok(())
}

/// In-process document store with commit instrumentation
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
    commit_sizes: Mutex<Vec<usize>>,
    commit_attempts: AtomicUsize,
    failing_commits: Mutex<HashSet<usize>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `n`-th commit attempt (1-based, counted across collections)
    pub fn fail_commit(&self, n: usize) {
        if let Ok(mut failing) = self.failing_commits.lock() {
            failing.insert(n);
        }
    }

    /// Size of every commit attempt, in order
    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commit_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page_size: usize,
        cursor: Option<&str>,
    ) -> StorageResult<Page> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Page::default());
        };

        let documents: Vec<Document> = docs
            .iter()
            .filter(|(id, _)| cursor.is_none_or(|c| id.as_str() > c))
            .filter(|(_, fields)| filters.iter().all(|f| f.matches(fields)))
            .take(page_size)
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        let next_cursor = if documents.len() == page_size {
            documents.last().map(|d| d.id.clone())
        } else {
            None
        };

        Ok(Page {
            documents,
            next_cursor,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn batch_commit(&self, collection: &str, ops: Vec<WriteOp>) -> StorageResult<()> {
        let attempt = self.commit_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sizes) = self.commit_sizes.lock() {
            sizes.push(ops.len());
        }
        check_batch_size(&ops)?;

        let injected = self
            .failing_commits
            .lock()
            .map(|failing| failing.contains(&attempt))
            .unwrap_or(false);
        if injected {
            return Err(StorageError::CommitRejected {
                collection: collection.to_string(),
                message: format!("injected failure on commit #{attempt}"),
            });
        }

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        // Validate before applying anything so the commit stays atomic
        let mut created = HashSet::new();
        for op in &ops {
            if let WriteOp::Create { id, .. } = op
                && (docs.contains_key(id) || !created.insert(id.as_str()))
            {
                return Err(StorageError::CommitRejected {
                    collection: collection.to_string(),
                    message: format!("document {id} already exists"),
                });
            }
        }

        for op in ops {
            match op {
                WriteOp::Create { id, fields } => {
                    docs.insert(id, fields);
                }
                WriteOp::Merge { id, fields } => {
                    docs.entry(id).or_default().extend(fields);
                }
                WriteOp::Replace { id, fields } => {
                    docs.insert(id, fields);
                }
                WriteOp::Delete { id } => {
                    docs.remove(&id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn create(id: &str, name: &str) -> WriteOp {
        WriteOp::Create {
            id: id.to_string(),
            fields: fields(json!({ "name": name })),
        }
    }

    #[tokio::test]
    async fn test_pagination_walks_whole_collection() {
        let store = MemoryDocumentStore::new();
        let ops = (0..25).map(|i| create(&format!("id{i:03}"), "x")).collect();
        store.batch_commit("channels", ops).await.unwrap();

        let first = store.query("channels", &[], 10, None).await.unwrap();
        assert_eq!(first.documents.len(), 10);
        assert_eq!(first.next_cursor.as_deref(), Some("id009"));

        let all = query_all(&store, "channels", &[], 10).await.unwrap();
        assert_eq!(all.len(), 25);
        assert_eq!(all[24].id, "id024");
    }

    #[tokio::test]
    async fn test_filters() {
        let store = MemoryDocumentStore::new();
        store
            .batch_commit("channels", vec![create("a", "La 1"), create("b", "La 2")])
            .await
            .unwrap();

        let page = store
            .query("channels", &[Filter::eq("name", "La 2")], 10, None)
            .await
            .unwrap();
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0].get_str("name"), Some("La 2"));
    }

    #[tokio::test]
    async fn test_commit_cap_enforced() {
        let store = MemoryDocumentStore::new();
        let ops: Vec<WriteOp> = (0..=MAX_BATCH_OPERATIONS)
            .map(|i| create(&i.to_string(), "x"))
            .collect();
        let err = store.batch_commit("channels", ops).await.unwrap_err();
        assert!(matches!(err, StorageError::BatchTooLarge { size: 501, max: 500 }));
        assert_eq!(store.count("channels").await, 0);
    }

    #[tokio::test]
    async fn test_create_conflict_rejects_whole_commit() {
        let store = MemoryDocumentStore::new();
        store.batch_commit("c", vec![create("a", "one")]).await.unwrap();

        let err = store
            .batch_commit("c", vec![create("b", "two"), create("a", "dup")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CommitRejected { .. }));
        assert_eq!(store.count("c").await, 1);
    }

    #[tokio::test]
    async fn test_merge_overwrites_only_named_fields() {
        let store = MemoryDocumentStore::new();
        store
            .batch_commit(
                "programs",
                vec![WriteOp::Merge {
                    id: "ch".to_string(),
                    fields: fields(json!({ "20240601": [1, 2], "20240602": [3] })),
                }],
            )
            .await
            .unwrap();
        store
            .batch_commit(
                "programs",
                vec![WriteOp::Merge {
                    id: "ch".to_string(),
                    fields: fields(json!({ "20240601": [9] })),
                }],
            )
            .await
            .unwrap();

        let doc = store.get("programs", "ch").await.unwrap().unwrap();
        assert_eq!(doc.fields["20240601"], json!([9]));
        assert_eq!(doc.fields["20240602"], json!([3]));
    }

    #[tokio::test]
    async fn test_replace_drops_unnamed_fields() {
        let store = MemoryDocumentStore::new();
        store
            .batch_commit(
                "curated_channels",
                vec![WriteOp::Merge {
                    id: "ch".to_string(),
                    fields: fields(json!({ "name": "TV3", "region": "Cataluña" })),
                }],
            )
            .await
            .unwrap();
        store
            .batch_commit(
                "curated_channels",
                vec![WriteOp::Replace {
                    id: "ch".to_string(),
                    fields: fields(json!({ "name": "TV3" })),
                }],
            )
            .await
            .unwrap();

        let doc = store.get("curated_channels", "ch").await.unwrap().unwrap();
        assert_eq!(doc.fields, fields(json!({ "name": "TV3" })));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryDocumentStore::new();
        store.fail_commit(2);
        assert!(store.batch_commit("c", vec![create("a", "1")]).await.is_ok());
        assert!(store.batch_commit("c", vec![create("b", "2")]).await.is_err());
        assert!(store.batch_commit("c", vec![create("c", "3")]).await.is_ok());
        assert_eq!(store.commit_sizes(), vec![1, 1, 1]);
        assert_eq!(store.count("c").await, 2);
    }
}
