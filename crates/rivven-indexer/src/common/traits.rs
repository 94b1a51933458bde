//! Traits for indexer collaborators
//!
//! Storage-engine access, change-log bookkeeping and the outbound bulk client
//! are defined here at their interface only. In-memory implementations live in
//! [`crate::testing`]; the HTTP bulk client lives in [`crate::http`].

use crate::common::{BulkPayload, ChangeLogEntry, LogId, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Primary (or index) key of a storage-engine row. Single-column keys are the
/// common case; composite keys list their columns in key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(pub Vec<i64>);

impl RowKey {
    pub fn single(id: i64) -> Self {
        Self(vec![id])
    }

    pub fn composite(parts: impl IntoIterator<Item = i64>) -> Self {
        Self(parts.into_iter().collect())
    }
}

/// A row read from the storage engine, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.columns.get(column)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.columns.get(column)?.as_str()
    }

    /// Booleans are stored either natively or as 0/1 integers.
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.columns.get(column)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            _ => None,
        }
    }

    /// Project onto the requested columns.
    pub fn project(&self, columns: &[&str]) -> Row {
        Row {
            columns: columns
                .iter()
                .filter_map(|c| self.columns.get(*c).map(|v| ((*c).to_string(), v.clone())))
                .collect(),
        }
    }
}

/// Storage-engine access for one worker.
///
/// Each worker owns its store exclusively; calls are never concurrent on the
/// same instance.
#[async_trait]
pub trait MetadataStore: Send {
    /// Start a read transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Batched primary-key read. Keys with no row are absent from the result.
    async fn read_by_keys(
        &mut self,
        table: &str,
        keys: &BTreeSet<RowKey>,
        columns: &[&str],
    ) -> Result<HashMap<RowKey, Row>>;

    /// Read every row whose `index_column` equals `key`.
    async fn read_by_index(
        &mut self,
        table: &str,
        index_column: &str,
        key: &RowKey,
        columns: &[&str],
    ) -> Result<Vec<Row>>;

    async fn commit(&mut self) -> Result<()>;

    async fn abort(&mut self) -> Result<()>;
}

/// The source change-log table.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Rows currently in the log, lowest id first, up to `limit`.
    async fn read_pending(&self, limit: usize) -> Result<Vec<ChangeLogEntry>>;

    /// Delete the given log rows. Ids that no longer exist are ignored; returns
    /// the number of rows removed.
    async fn delete(&self, log_ids: &BTreeSet<LogId>) -> Result<usize>;
}

/// Response to a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkResponse {
    /// Request reached the server and a response was read
    pub success: bool,
    pub http_status: u16,
    pub raw_response: String,
}

impl BulkResponse {
    pub fn ok(raw_response: impl Into<String>) -> Self {
        Self {
            success: true,
            http_status: 200,
            raw_response: raw_response.into(),
        }
    }

    /// Transport succeeded and the status is 2xx.
    pub fn is_ok(&self) -> bool {
        self.success && (200..300).contains(&self.http_status)
    }
}

/// Outbound client for the search index.
///
/// `Err` means the request did not complete at the transport level.
#[async_trait]
pub trait BulkIndexClient: Send + Sync {
    async fn submit(&self, payload: &BulkPayload) -> Result<BulkResponse>;
}
