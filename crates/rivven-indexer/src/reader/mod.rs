//! # Metadata Readers
//!
//! Turn a deduplicated batch into index operations.
//!
//! Two strategies exist, selected once at construction:
//!
//! - [`SchemaBasedReader`] - joins each change against the template / table /
//!   field catalog and projects searchable fields into
//!   `doc.xattr.<template>.<table>.<field>`
//! - [`XAttrReader`] - reads generic extended attributes and projects them
//!   into `doc.xattr.<name>`
//!
//! A delete removes exactly the path its record was projected to, from the
//! document the record belongs to. Changes to one document leave the reader
//! in log order, so a removal and a later write of the same path are applied
//! in the order they happened.

mod schema_based;
mod xattr;

pub use schema_based::*;
pub use xattr::*;

use crate::common::{
    merge_fragment, CompositeKey, DedupedBatch, IndexConfig, IndexOperation, LogId,
    MetadataStore, PendingOperation, ReaderKind, Result,
};
use std::collections::BTreeSet;

/// Everything a reader produced for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderOutput {
    /// Operations to submit, each with the log ids it confirms
    pub operations: Vec<PendingOperation>,
    /// Log ids that need no index write and may be deleted right away
    pub completed: BTreeSet<LogId>,
    /// Records that could not be resolved this cycle
    pub retained: Vec<CompositeKey>,
    /// Fields omitted because their value did not parse
    pub coercion_errors: u64,
}

impl ReaderOutput {
    /// Everything in `batch` retained, nothing produced.
    pub fn retain_all(batch: &DedupedBatch) -> Self {
        Self {
            retained: batch.winners().map(|e| e.key).collect(),
            ..Default::default()
        }
    }

    /// Enforce that a log id is only confirmed when every record it touched
    /// was resolved, and never deleted ahead of a pending write.
    pub(crate) fn finish(mut self, retained_ids: &BTreeSet<LogId>) -> Self {
        for pending in &mut self.operations {
            pending.log_ids.retain(|id| !retained_ids.contains(id));
        }
        let written: BTreeSet<LogId> = self
            .operations
            .iter()
            .flat_map(|p| p.log_ids.iter().copied())
            .collect();
        self.completed
            .retain(|id| !retained_ids.contains(id) && !written.contains(id));
        self
    }
}

/// Reader strategy owned by one worker.
#[derive(Debug)]
pub enum MetadataReader {
    SchemaBased(SchemaBasedReader),
    XAttr(XAttrReader),
}

impl MetadataReader {
    pub fn new(kind: ReaderKind, index: &IndexConfig, lru_capacity: usize) -> Self {
        match kind {
            ReaderKind::SchemaBased => Self::SchemaBased(SchemaBasedReader::new(
                index.index_name.clone(),
                lru_capacity,
            )),
            ReaderKind::XAttr => Self::XAttr(XAttrReader::new(index.index_name.clone())),
        }
    }

    pub fn kind(&self) -> ReaderKind {
        match self {
            Self::SchemaBased(_) => ReaderKind::SchemaBased,
            Self::XAttr(_) => ReaderKind::XAttr,
        }
    }

    /// Build operations for `batch`. An `Err` means the storage engine failed
    /// and nothing from the batch may be confirmed.
    pub async fn process(
        &mut self,
        store: &mut dyn MetadataStore,
        batch: &DedupedBatch,
    ) -> Result<ReaderOutput> {
        match self {
            Self::SchemaBased(reader) => reader.process(store, batch).await,
            Self::XAttr(reader) => reader.process(store, batch).await,
        }
    }

    /// Cumulative `(hits, misses)` of the schema caches.
    pub fn cache_stats(&self) -> (u64, u64) {
        match self {
            Self::SchemaBased(reader) => (reader.caches().hits(), reader.caches().misses()),
            Self::XAttr(_) => (0, 0),
        }
    }
}

/// Value that decides which worker handles a change. Changes that can touch
/// the same document path always share it: schema-based records are grouped
/// by tuple, extended attributes by inode.
pub fn partition_key(kind: ReaderKind, key: &CompositeKey) -> i64 {
    match kind {
        ReaderKind::SchemaBased => key.tuple_id,
        ReaderKind::XAttr => key.entity_id,
    }
}

/// A resolved change to one document, ordered by the log id of the change
/// that produced it.
#[derive(Debug, Clone)]
pub(crate) struct DocumentChange {
    pub sequence: LogId,
    pub operation: IndexOperation,
    pub log_ids: BTreeSet<LogId>,
}

impl DocumentChange {
    pub fn new(
        sequence: LogId,
        operation: IndexOperation,
        log_ids: impl IntoIterator<Item = LogId>,
    ) -> Self {
        Self {
            sequence,
            operation,
            log_ids: log_ids.into_iter().collect(),
        }
    }
}

/// Order changes by document, then by log id, merging runs of upserts to the
/// same document into one. A removal always stays between the writes it was
/// logged between.
pub(crate) fn assemble_operations(mut changes: Vec<DocumentChange>) -> Vec<PendingOperation> {
    changes.sort_by_key(|c| (c.operation.target_id, c.sequence));

    let mut operations: Vec<PendingOperation> = Vec::with_capacity(changes.len());
    for change in changes {
        if let Some(last) = operations.last_mut() {
            if last.operation.is_upsert()
                && change.operation.is_upsert()
                && last.operation.target_id == change.operation.target_id
            {
                merge_fragment(&mut last.operation.fragment, change.operation.fragment);
                last.log_ids.extend(change.log_ids);
                continue;
            }
        }
        operations.push(PendingOperation {
            operation: change.operation,
            log_ids: change.log_ids,
        });
    }
    operations
}

/// Close the read transaction, aborting if the reads failed.
pub(crate) async fn finish_transaction<T>(
    store: &mut dyn MetadataStore,
    outcome: Result<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            store.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = store.abort().await {
                tracing::warn!("Failed to abort read transaction: {}", abort_err);
            }
            Err(e)
        }
    }
}
