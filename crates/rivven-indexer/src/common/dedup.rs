//! # Batch Deduplication
//!
//! Collapses a drained batch so that each logical record is materialized once.
//!
//! Within a batch, only the entry with the highest `log_id` per
//! [`CompositeKey`] wins. The losing entries are kept alongside the winner:
//! their log rows become deletable together with the winner's once the
//! winning operation is confirmed.

use crate::common::{ChangeLogEntry, LogId};
use std::collections::HashMap;

/// The winning entry for one key plus the entries it superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupGroup {
    pub winner: ChangeLogEntry,
    pub superseded: Vec<ChangeLogEntry>,
}

impl DedupGroup {
    /// Every log id in the group, winner first.
    pub fn log_ids(&self) -> Vec<LogId> {
        std::iter::once(self.winner.log_id)
            .chain(self.superseded.iter().map(|e| e.log_id))
            .collect()
    }
}

/// Result of [`dedup_batch`]. Groups are ordered by winning `log_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupedBatch {
    pub groups: Vec<DedupGroup>,
}

impl DedupedBatch {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of entries that lost to a newer entry for the same key.
    pub fn superseded_count(&self) -> usize {
        self.groups.iter().map(|g| g.superseded.len()).sum()
    }

    /// All log ids in the batch.
    pub fn log_ids(&self) -> Vec<LogId> {
        self.groups.iter().flat_map(|g| g.log_ids()).collect()
    }

    pub fn winners(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.groups.iter().map(|g| &g.winner)
    }
}

/// Keep the highest `log_id` per key.
pub fn dedup_batch(entries: Vec<ChangeLogEntry>) -> DedupedBatch {
    let mut by_key: HashMap<String, DedupGroup> = HashMap::with_capacity(entries.len());

    for entry in entries {
        match by_key.get_mut(&entry.key.dedup_key()) {
            Some(group) => {
                if entry.log_id > group.winner.log_id {
                    let previous = std::mem::replace(&mut group.winner, entry);
                    group.superseded.push(previous);
                } else {
                    group.superseded.push(entry);
                }
            }
            None => {
                by_key.insert(
                    entry.key.dedup_key(),
                    DedupGroup {
                        winner: entry,
                        superseded: Vec::new(),
                    },
                );
            }
        }
    }

    let mut groups: Vec<DedupGroup> = by_key.into_values().collect();
    groups.sort_by_key(|g| g.winner.log_id);
    for group in &mut groups {
        group.superseded.sort_by_key(|e| e.log_id);
    }

    DedupedBatch { groups }
}
