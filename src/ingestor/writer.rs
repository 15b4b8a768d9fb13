//! Batch persistence writer
//!
//! Translates channels and program buckets into document-store mutations and
//! commits them in chunks no larger than the store's per-commit cap. A failed
//! chunk is logged and recorded, and the remaining chunks still run.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CollectionNames, PipelineConfig};
use crate::errors::{AppError, AppResult};
use crate::ingestor::classifier::classify;
use crate::models::{Channel, DayKey, Program};
use crate::storage::{DocumentStore, Fields, WriteOp, query_all};

/// A chunk commit the store rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub collection: String,
    /// Position of the chunk within its write call
    pub chunk: usize,
    pub operations: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelWriteReport {
    /// Newly created channels: name to allocated id
    pub created: IndexMap<String, String>,
    /// Channels already stored before this write: name to stored id
    pub existing: IndexMap<String, String>,
    /// Names repeated within the input
    pub duplicates: usize,
    pub failed_commits: Vec<CommitFailure>,
}

impl ChannelWriteReport {
    /// Every channel name with a stored id, created or pre-existing
    pub fn ids(&self) -> IndexMap<String, String> {
        self.existing
            .iter()
            .chain(&self.created)
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub commits: usize,
    pub operations_committed: usize,
    pub channels_written: usize,
    /// Day buckets emptied because the channel has no programs that day
    pub buckets_cleared: usize,
    pub unresolved_channels: Vec<String>,
    pub failed_commits: Vec<CommitFailure>,
}

impl WriteReport {
    pub(crate) fn absorb(&mut self, other: WriteReport) {
        self.commits += other.commits;
        self.operations_committed += other.operations_committed;
        self.channels_written += other.channels_written;
        self.buckets_cleared += other.buckets_cleared;
        self.unresolved_channels.extend(other.unresolved_channels);
        self.failed_commits.extend(other.failed_commits);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CuratedReport {
    pub channels_copied: usize,
    pub program_documents_copied: usize,
    pub skipped_unknown: usize,
    pub failed_commits: Vec<CommitFailure>,
}

/// Split `items` into consecutive chunks of at most `size`
fn into_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn to_fields<T: Serialize>(value: &T) -> AppResult<Fields> {
    match serde_json::to_value(value).map_err(crate::errors::StorageError::from)? {
        Value::Object(fields) => Ok(fields),
        other => Err(AppError::internal(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

pub struct BatchWriter {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    page_size: usize,
    collections: CollectionNames,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn DocumentStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            batch_size: config.effective_batch_size(),
            page_size: config.page_size.max(1),
            collections: config.collections.clone(),
        }
    }

    /// Stored channels keyed by name
    pub async fn existing_channels(&self) -> AppResult<IndexMap<String, Channel>> {
        let documents =
            query_all(self.store.as_ref(), &self.collections.channels, &[], self.page_size)
                .await?;

        let mut channels = IndexMap::with_capacity(documents.len());
        for document in documents {
            match serde_json::from_value::<Channel>(Value::Object(document.fields)) {
                Ok(mut channel) => {
                    channel.id = document.id;
                    channels.entry(channel.name.clone()).or_insert(channel);
                }
                Err(e) => warn!("Skipping unreadable channel document {}: {}", document.id, e),
            }
        }
        Ok(channels)
    }

    /// Create every channel whose name is not stored yet
    pub async fn write_channels(&self, channels: &[Channel]) -> AppResult<ChannelWriteReport> {
        let stored = self.existing_channels().await?;
        let mut report = ChannelWriteReport::default();
        let mut staged_names = HashSet::new();
        let mut staged = Vec::new();

        for channel in channels {
            if let Some(existing) = stored.get(&channel.name) {
                report
                    .existing
                    .insert(channel.name.clone(), existing.id.clone());
                continue;
            }
            if !staged_names.insert(channel.name.as_str()) {
                report.duplicates += 1;
                continue;
            }
            let id = Uuid::new_v4().to_string();
            staged.push((
                channel.name.clone(),
                WriteOp::Create {
                    id,
                    fields: to_fields(channel)?,
                },
            ));
        }

        debug!(
            "Staged {} channel creates ({} already stored, {} duplicates)",
            staged.len(),
            report.existing.len(),
            report.duplicates
        );

        let collection = &self.collections.channels;
        for (chunk_idx, chunk) in into_chunks(staged, self.batch_size).into_iter().enumerate() {
            let (names, ops): (Vec<String>, Vec<WriteOp>) = chunk.into_iter().unzip();
            let ids: Vec<String> = ops.iter().map(|op| op.id().to_string()).collect();
            let operations = ops.len();

            debug!("Committing channel chunk {} with {} creates", chunk_idx, operations);
            match self.store.batch_commit(collection, ops).await {
                Ok(()) => report.created.extend(names.into_iter().zip(ids)),
                Err(e) => {
                    error!(
                        "Failed to commit channel chunk {} ({} creates) to {}: {}",
                        chunk_idx, operations, collection, e
                    );
                    report.failed_commits.push(CommitFailure {
                        collection: collection.clone(),
                        chunk: chunk_idx,
                        operations,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Channel write complete: {} created, {} existing, {} failed commits",
            report.created.len(),
            report.existing.len(),
            report.failed_commits.len()
        );
        Ok(report)
    }

    /// Overwrite one day bucket per entry on a channel's program document
    pub async fn write_programs_for_channel(
        &self,
        channel_id: &str,
        buckets: &IndexMap<DayKey, Vec<Program>>,
    ) -> WriteReport {
        let collection = &self.collections.programs;
        let mut report = WriteReport::default();
        let mut ops = Vec::with_capacity(buckets.len());

        for (day, programs) in buckets {
            let resolved: Vec<Program> = programs
                .iter()
                .cloned()
                .map(|mut p| {
                    p.channel_id = channel_id.to_string();
                    p
                })
                .collect();
            match serde_json::to_value(&resolved) {
                Ok(value) => {
                    let mut fields = Fields::new();
                    fields.insert(day.to_string(), value);
                    ops.push(WriteOp::Merge {
                        id: channel_id.to_string(),
                        fields,
                    });
                }
                Err(e) => {
                    error!("Failed to serialize {} bucket for {}: {}", day, channel_id, e);
                    report.failed_commits.push(CommitFailure {
                        collection: collection.clone(),
                        chunk: 0,
                        operations: 1,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for (chunk_idx, chunk) in into_chunks(ops, self.batch_size).into_iter().enumerate() {
            let operations = chunk.len();
            match self.store.batch_commit(collection, chunk).await {
                Ok(()) => {
                    debug!(
                        "Committed program chunk {} ({} buckets) for channel {}",
                        chunk_idx, operations, channel_id
                    );
                    report.commits += 1;
                    report.operations_committed += operations;
                }
                Err(e) => {
                    error!(
                        "Failed to commit program chunk {} ({} buckets) for channel {}: {}",
                        chunk_idx, operations, channel_id, e
                    );
                    report.failed_commits.push(CommitFailure {
                        collection: collection.clone(),
                        chunk: chunk_idx,
                        operations,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.operations_committed > 0 {
            report.channels_written = 1;
        }
        report
    }

    /// Write every channel's programs, grouped into day buckets.
    ///
    /// Channels are written one after another; names missing from `ids` are
    /// skipped and listed in the report.
    pub async fn write_programs(
        &self,
        ids: &IndexMap<String, String>,
        programs: &IndexMap<String, Vec<Program>>,
    ) -> WriteReport {
        let mut report = WriteReport::default();

        for (name, channel_programs) in programs {
            let Some(channel_id) = ids.get(name) else {
                warn!(
                    "No stored id for channel '{}'; skipping {} programs",
                    name,
                    channel_programs.len()
                );
                report.unresolved_channels.push(name.clone());
                continue;
            };

            let mut buckets: IndexMap<DayKey, Vec<Program>> = IndexMap::new();
            for program in channel_programs {
                buckets.entry(program.day).or_default().push(program.clone());
            }
            report.absorb(self.write_programs_for_channel(channel_id, &buckets).await);
        }

        info!(
            "Program write complete: {} channels, {} buckets, {} unresolved, {} failed commits",
            report.channels_written,
            report.operations_committed,
            report.unresolved_channels.len(),
            report.failed_commits.len()
        );
        report
    }

    /// Empty the `day` bucket of every stored channel that has no programs in
    /// `scheduled`, so a refresh fully replaces that day
    pub async fn clear_day(
        &self,
        day: DayKey,
        scheduled: &IndexMap<String, Vec<Program>>,
    ) -> AppResult<WriteReport> {
        let field = day.to_string();
        let collection = &self.collections.programs;
        let mut ops = Vec::new();

        for channel in self.existing_channels().await?.into_values() {
            if scheduled.contains_key(&channel.name) {
                continue;
            }
            let Some(document) = self.store.get(collection, &channel.id).await? else {
                continue;
            };
            let stale = document
                .fields
                .get(&field)
                .and_then(Value::as_array)
                .is_some_and(|bucket| !bucket.is_empty());
            if stale {
                debug!("Clearing stale {} bucket for channel {}", field, channel.name);
                let mut fields = Fields::new();
                fields.insert(field.clone(), Value::Array(Vec::new()));
                ops.push(WriteOp::Merge {
                    id: channel.id,
                    fields,
                });
            }
        }

        let (cleared, failed_commits) = self.commit_chunks(collection, ops).await;
        if cleared > 0 {
            info!("Cleared {} stale {} buckets", cleared, field);
        }
        Ok(WriteReport {
            buckets_cleared: cleared,
            failed_commits,
            ..WriteReport::default()
        })
    }

    /// Delete every document in a collection, a page at a time
    pub async fn purge_collection(&self, collection: &str) -> AppResult<usize> {
        let mut deleted = 0;

        loop {
            let page = self
                .store
                .query(collection, &[], self.page_size, None)
                .await?;
            if page.documents.is_empty() {
                break;
            }

            let ops: Vec<WriteOp> = page
                .documents
                .into_iter()
                .map(|d| WriteOp::Delete { id: d.id })
                .collect();
            let mut page_deleted = 0;
            let mut last_error = None;
            for chunk in into_chunks(ops, self.batch_size) {
                let operations = chunk.len();
                match self.store.batch_commit(collection, chunk).await {
                    Ok(()) => page_deleted += operations,
                    Err(e) => {
                        error!("Failed to delete {} documents from {}: {}", operations, collection, e);
                        last_error = Some(e);
                    }
                }
            }

            if page_deleted == 0
                && let Some(e) = last_error
            {
                return Err(e.into());
            }
            deleted += page_deleted;
            debug!("Purged {} documents from {} so far", deleted, collection);
        }

        info!("Purged {} documents from {}", deleted, collection);
        Ok(deleted)
    }

    /// Copy classified channels and their program documents into the curated
    /// collections, refreshing each channel's category and region on the way.
    /// Curated documents are replaced whole.
    pub async fn copy_curated(&self) -> AppResult<CuratedReport> {
        let mut report = CuratedReport::default();
        let mut channel_ops = Vec::new();
        let mut program_ops = Vec::new();

        for channel in self.existing_channels().await?.into_values() {
            let class = classify(&channel.name);
            if !class.is_known() {
                report.skipped_unknown += 1;
                continue;
            }

            let curated = Channel {
                category: class.category,
                region: class.region,
                ..channel
            };
            channel_ops.push(WriteOp::Replace {
                id: curated.id.clone(),
                fields: to_fields(&curated)?,
            });

            if let Some(programs) = self
                .store
                .get(&self.collections.programs, &curated.id)
                .await?
            {
                program_ops.push(WriteOp::Replace {
                    id: programs.id,
                    fields: programs.fields,
                });
            }
        }

        let (copied, failures) = self
            .commit_chunks(&self.collections.curated_channels, channel_ops)
            .await;
        report.channels_copied = copied;
        report.failed_commits.extend(failures);

        let (copied, failures) = self
            .commit_chunks(&self.collections.curated_programs, program_ops)
            .await;
        report.program_documents_copied = copied;
        report.failed_commits.extend(failures);

        info!(
            "Curated copy complete: {} channels, {} program documents, {} unclassified skipped",
            report.channels_copied, report.program_documents_copied, report.skipped_unknown
        );
        Ok(report)
    }

    /// Commit `ops` chunk by chunk, returning committed operations and failures
    async fn commit_chunks(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
    ) -> (usize, Vec<CommitFailure>) {
        let mut committed = 0;
        let mut failures = Vec::new();

        for (chunk_idx, chunk) in into_chunks(ops, self.batch_size).into_iter().enumerate() {
            let operations = chunk.len();
            match self.store.batch_commit(collection, chunk).await {
                Ok(()) => committed += operations,
                Err(e) => {
                    error!(
                        "Failed to commit chunk {} ({} operations) to {}: {}",
                        chunk_idx, operations, collection, e
                    );
                    failures.push(CommitFailure {
                        collection: collection.to_string(),
                        chunk: chunk_idx,
                        operations,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (committed, failures)
    }
}
