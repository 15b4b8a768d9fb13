//! SeaORM-backed document store
//!
//! All collections share one `documents` table keyed by `(collection, id)`
//! with the document body stored as JSON text. Batch commits run inside a
//! single transaction, so a failing operation rolls back the whole chunk.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, Value,
};
use sea_orm_migration::MigratorTrait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};

use super::document_store::{Document, DocumentStore, Fields, Filter, Page, WriteOp};
use super::migrations::Migrator;
use crate::config::DatabaseConfig;
use crate::entities::{documents, prelude::Documents};
use crate::errors::{StorageError, StorageResult};

#[derive(Clone)]
pub struct SqlDocumentStore {
    connection: Arc<DatabaseConnection>,
}

impl SqlDocumentStore {
    /// Connect using the database configuration and run pending migrations
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections.max(1))
            .sqlx_logging(false);
        let connection = Database::connect(options).await?;

        let store = Self::from_connection(Arc::new(connection));
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_connection(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        Migrator::up(&*self.connection, None).await?;
        info!("Document store migrations applied");
        Ok(())
    }

    fn to_document(model: documents::Model) -> StorageResult<Document> {
        let fields: Fields = serde_json::from_str(&model.data)?;
        Ok(Document {
            id: model.id,
            fields,
        })
    }

    /// SQL value comparable with `json_extract` output for a JSON scalar
    fn json_scalar(value: &JsonValue) -> Value {
        match value {
            JsonValue::String(s) => s.as_str().into(),
            JsonValue::Bool(b) => i64::from(*b).into(),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => i.into(),
                None => n.as_f64().unwrap_or_default().into(),
            },
            other => other.to_string().into(),
        }
    }

    async fn load_fields<C: ConnectionTrait>(
        conn: &C,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<Fields>> {
        Documents::find_by_id((collection.to_string(), id.to_string()))
            .one(conn)
            .await?
            .map(|model| Self::to_document(model).map(|doc| doc.fields))
            .transpose()
    }

    /// Insert or overwrite the whole body of one document
    async fn upsert<C: ConnectionTrait>(
        conn: &C,
        model: documents::ActiveModel,
    ) -> StorageResult<()> {
        Documents::insert(model)
            .on_conflict(
                OnConflict::columns([documents::Column::Collection, documents::Column::Id])
                    .update_columns([documents::Column::Data, documents::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page_size: usize,
        cursor: Option<&str>,
    ) -> StorageResult<Page> {
        let mut select = Documents::find().filter(documents::Column::Collection.eq(collection));

        if let Some(cursor) = cursor {
            select = select.filter(documents::Column::Id.gt(cursor));
        }

        for filter in filters {
            match filter {
                Filter::Eq { field, value } => {
                    select = select.filter(Expr::cust_with_values(
                        "json_extract(data, ?) = ?",
                        [Value::from(format!("$.\"{field}\"")), Self::json_scalar(value)],
                    ));
                }
            }
        }

        let documents = select
            .order_by_asc(documents::Column::Id)
            .limit(page_size as u64)
            .all(self.connection.as_ref())
            .await?
            .into_iter()
            .map(Self::to_document)
            .collect::<StorageResult<Vec<_>>>()?;

        let next_cursor = if documents.len() == page_size {
            documents.last().map(|d| d.id.clone())
        } else {
            None
        };

        debug!(
            "Queried {} documents from {} (cursor={:?})",
            documents.len(),
            collection,
            cursor
        );
        Ok(Page {
            documents,
            next_cursor,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        Ok(Self::load_fields(self.connection.as_ref(), collection, id)
            .await?
            .map(|fields| Document {
                id: id.to_string(),
                fields,
            }))
    }

    async fn batch_commit(&self, collection: &str, ops: Vec<WriteOp>) -> StorageResult<()> {
        if ops.len() > super::document_store::MAX_BATCH_OPERATIONS {
            return Err(StorageError::BatchTooLarge {
                size: ops.len(),
                max: super::document_store::MAX_BATCH_OPERATIONS,
            });
        }

        let op_count = ops.len();
        let now = Utc::now();
        let model = |id: String, fields: &Fields| -> StorageResult<documents::ActiveModel> {
            Ok(documents::ActiveModel {
                collection: Set(collection.to_string()),
                id: Set(id),
                data: Set(serde_json::to_string(fields)?),
                updated_at: Set(now),
            })
        };
        // Dropping the transaction on an early return rolls it back
        let txn = self.connection.begin().await?;

        for op in ops {
            match op {
                WriteOp::Create { id, fields } => {
                    Documents::insert(model(id, &fields)?)
                        .exec_without_returning(&txn)
                        .await?;
                }
                WriteOp::Merge { id, fields } => {
                    let mut merged = Self::load_fields(&txn, collection, &id)
                        .await?
                        .unwrap_or_default();
                    merged.extend(fields);
                    Self::upsert(&txn, model(id, &merged)?).await?;
                }
                WriteOp::Replace { id, fields } => {
                    Self::upsert(&txn, model(id, &fields)?).await?;
                }
                WriteOp::Delete { id } => {
                    Documents::delete_by_id((collection.to_string(), id))
                        .exec(&txn)
                        .await?;
                }
            }
        }

        txn.commit().await?;
        debug!("Committed {} operations to {}", op_count, collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> SqlDocumentStore {
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("docs.db").display()),
            max_connections: 1,
        };
        SqlDocumentStore::connect(&config).await.unwrap()
    }

    fn fields(value: JsonValue) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_query_and_paginate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let ops = (0..7)
            .map(|i| WriteOp::Create {
                id: format!("id{i}"),
                fields: fields(json!({ "name": format!("Channel {i}"), "category": "TDT" })),
            })
            .collect();
        store.batch_commit("channels", ops).await.unwrap();

        let first = store.query("channels", &[], 5, None).await.unwrap();
        assert_eq!(first.documents.len(), 5);
        assert_eq!(first.next_cursor.as_deref(), Some("id4"));

        let second = store
            .query("channels", &[], 5, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.documents.len(), 2);
        assert!(second.next_cursor.is_none());

        let filtered = store
            .query("channels", &[Filter::eq("name", "Channel 3")], 10, None)
            .await
            .unwrap();
        assert_eq!(filtered.documents.len(), 1);
        assert_eq!(filtered.documents[0].id, "id3");
    }

    #[tokio::test]
    async fn test_duplicate_create_rolls_back_commit() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let create = |id: &str| WriteOp::Create {
            id: id.to_string(),
            fields: fields(json!({ "name": id })),
        };

        store.batch_commit("channels", vec![create("a")]).await.unwrap();
        assert!(
            store
                .batch_commit("channels", vec![create("b"), create("a")])
                .await
                .is_err()
        );
        assert!(store.get("channels", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let merge = |value: JsonValue| WriteOp::Merge {
            id: "ch".to_string(),
            fields: fields(value),
        };
        store
            .batch_commit("programs", vec![merge(json!({ "20240601": [1], "20240602": [2] }))])
            .await
            .unwrap();
        store
            .batch_commit("programs", vec![merge(json!({ "20240601": [] }))])
            .await
            .unwrap();

        let doc = store.get("programs", "ch").await.unwrap().unwrap();
        assert_eq!(doc.fields["20240601"], json!([]));
        assert_eq!(doc.fields["20240602"], json!([2]));

        store
            .batch_commit("programs", vec![WriteOp::Delete { id: "ch".to_string() }])
            .await
            .unwrap();
        assert!(store.get("programs", "ch").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_overwrites_whole_document() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .batch_commit(
                "channels",
                vec![WriteOp::Merge {
                    id: "ch".to_string(),
                    fields: fields(json!({ "name": "La 1", "region": "Madrid" })),
                }],
            )
            .await
            .unwrap();
        store
            .batch_commit(
                "channels",
                vec![WriteOp::Replace {
                    id: "ch".to_string(),
                    fields: fields(json!({ "name": "La 1" })),
                }],
            )
            .await
            .unwrap();

        let doc = store.get("channels", "ch").await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("La 1"));
        assert!(!doc.fields.contains_key("region"));

        store
            .batch_commit(
                "channels",
                vec![WriteOp::Replace {
                    id: "new".to_string(),
                    fields: fields(json!({ "name": "TV3" })),
                }],
            )
            .await
            .unwrap();
        assert!(store.get("channels", "new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconnect_keeps_existing_documents() {
        let dir = TempDir::new().unwrap();
        let first = store(&dir).await;
        first
            .batch_commit(
                "channels",
                vec![WriteOp::Create {
                    id: "ch".to_string(),
                    fields: fields(json!({ "name": "La 1" })),
                }],
            )
            .await
            .unwrap();

        let second = store(&dir).await;
        second.migrate().await.unwrap();
        let doc = second.get("channels", "ch").await.unwrap().unwrap();
        assert_eq!(doc.fields["name"], json!("La 1"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_batch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let ops = (0..501)
            .map(|i| WriteOp::Delete { id: i.to_string() })
            .collect();
        assert!(matches!(
            store.batch_commit("channels", ops).await,
            Err(StorageError::BatchTooLarge { size: 501, .. })
        ));
    }
}
