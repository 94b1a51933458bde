//! Change-log entry representation
//!
//! A [`ChangeLogEntry`] is one row of the storage engine's change log. The
//! `log_id` identifies the log row; the [`CompositeKey`] identifies the logical
//! record that changed. Several entries may share a key when the same record is
//! modified repeatedly before a batch is drained.

use crate::common::{IndexerError, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// Primary key of a change-log row. Strictly increasing per source.
pub type LogId = i64;

/// Change operation recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChangeOp {
    /// Record created
    Add,
    /// Record modified
    Update,
    /// Record removed
    Delete,
    /// All attributes of the record replaced upstream
    AddAll,
}

impl ChangeOp {
    /// Decode the operation code stored in the log table.
    pub fn from_code(code: i8) -> Result<Self> {
        match code {
            0 => Ok(Self::Add),
            1 => Ok(Self::Update),
            2 => Ok(Self::Delete),
            3 => Ok(Self::AddAll),
            other => Err(IndexerError::schema(format!(
                "unknown change operation code {}",
                other
            ))),
        }
    }

    /// Operation code as stored in the log table.
    pub fn code(&self) -> i8 {
        match self {
            Self::Add => 0,
            Self::Update => 1,
            Self::Delete => 2,
            Self::AddAll => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::AddAll => "add_all",
        }
    }
}

/// Identifies the logical record a change-log entry refers to.
///
/// For schema-based metadata the components are `(metadata id, field id,
/// tuple id)`; for extended attributes they are `(inode id, namespace,
/// attribute id)`. Equality and hashing cover every component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct CompositeKey {
    pub entity_id: i64,
    pub field_id: i64,
    pub tuple_id: i64,
}

impl CompositeKey {
    pub fn new(entity_id: i64, field_id: i64, tuple_id: i64) -> Self {
        Self {
            entity_id,
            field_id,
            tuple_id,
        }
    }

    /// Stable string form used as the deduplication key.
    pub fn dedup_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.entity_id, self.field_id, self.tuple_id)
    }
}

/// One row of the change log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeLogEntry {
    pub log_id: LogId,
    pub key: CompositeKey,
    pub op: ChangeOp,
    pub created_at: DateTime<Utc>,
}

impl ChangeLogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(log_id: LogId, key: CompositeKey, op: ChangeOp) -> Self {
        Self {
            log_id,
            key,
            op,
            created_at: Utc::now(),
        }
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    #[inline]
    pub fn is_delete(&self) -> bool {
        self.op == ChangeOp::Delete
    }
}
