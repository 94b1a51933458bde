//! Testing utilities for the indexer
//!
//! In-memory implementations of the collaborator traits, for exercising the
//! pipeline without a storage engine or a search cluster.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_indexer::testing::*;
//!
//! let store = MemoryMetadataStore::new();
//! store.add_template(1, "meta");
//! store.add_table(7, "t1", 1);
//! store.add_field(2, "status", 7, true, FieldType::Text);
//!
//! let client = MockBulkClient::new();
//! client.push_response(MockResponse::Status(503));
//! ```

use crate::common::{
    BulkIndexClient, BulkPayload, BulkResponse, ChangeLogEntry, ChangeLogStore, FieldType,
    IndexerError, LogId, MetadataStore, Result, Row, RowKey,
};
use crate::reader::{
    META_DATA, META_FIELDS, META_TABLES, META_TEMPLATES, META_TUPLE_TO_FILE,
    XATTR_TABLE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// Memory Metadata Store
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    tables: HashMap<String, BTreeMap<RowKey, Row>>,
    /// Keys requested per table, one entry per read call
    reads: HashMap<String, Vec<Vec<RowKey>>>,
    fail_reads: bool,
    begins: usize,
    commits: usize,
    aborts: usize,
}

/// In-memory storage engine. Clones share state, so a test can keep a handle
/// for seeding and inspection while a worker owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row.
    pub fn insert(&self, table: &str, key: RowKey, row: Row) {
        self.inner
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(key, row);
    }

    pub fn remove(&self, table: &str, key: &RowKey) {
        if let Some(rows) = self.inner.lock().tables.get_mut(table) {
            rows.remove(key);
        }
    }

    pub fn add_field(&self, id: i64, name: &str, table_id: i64, searchable: bool, ty: FieldType) {
        self.insert(
            META_FIELDS,
            RowKey::single(id),
            Row::new()
                .with("fieldid", id)
                .with("name", name)
                .with("tableid", table_id)
                .with("searchable", searchable)
                .with("type", ty.code()),
        );
    }

    pub fn add_table(&self, id: i64, name: &str, template_id: i64) {
        self.insert(
            META_TABLES,
            RowKey::single(id),
            Row::new()
                .with("tableid", id)
                .with("name", name)
                .with("templateid", template_id),
        );
    }

    pub fn add_template(&self, id: i64, name: &str) {
        self.insert(
            META_TEMPLATES,
            RowKey::single(id),
            Row::new().with("templateid", id).with("name", name),
        );
    }

    pub fn add_tuple(&self, tuple_id: i64, inode_id: i64) {
        self.insert(
            META_TUPLE_TO_FILE,
            RowKey::single(tuple_id),
            Row::new().with("tupleid", tuple_id).with("inodeid", inode_id),
        );
    }

    pub fn add_value(&self, id: i64, field_id: i64, tuple_id: i64, data: &str) {
        let row = Row::new()
            .with("id", id)
            .with("fieldid", field_id)
            .with("tupleid", tuple_id)
            .with("data", data);
        self.insert(
            META_DATA,
            RowKey::composite([id, field_id, tuple_id]),
            row,
        );
    }

    pub fn add_xattr(&self, inode_id: i64, namespace: i64, attr_id: i64, name: &str, value: &str) {
        self.insert(
            XATTR_TABLE,
            RowKey::composite([inode_id, namespace, attr_id]),
            Row::new()
                .with("inode_id", inode_id)
                .with("namespace", namespace)
                .with("attr_id", attr_id)
                .with("name", name)
                .with("value", value),
        );
    }

    /// Make every subsequent read fail with a storage error.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Number of read calls against `table`.
    pub fn read_calls(&self, table: &str) -> usize {
        self.inner.lock().reads.get(table).map_or(0, |r| r.len())
    }

    pub fn total_read_calls(&self) -> usize {
        self.inner.lock().reads.values().map(|r| r.len()).sum()
    }

    /// Keys requested from `table`, one entry per read call.
    pub fn keys_read(&self, table: &str) -> Vec<Vec<RowKey>> {
        self.inner
            .lock()
            .reads
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn begins(&self) -> usize {
        self.inner.lock().begins
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().commits
    }

    pub fn aborts(&self) -> usize {
        self.inner.lock().aborts
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&mut self) -> Result<()> {
        self.inner.lock().begins += 1;
        Ok(())
    }

    async fn read_by_keys(
        &mut self,
        table: &str,
        keys: &BTreeSet<RowKey>,
        columns: &[&str],
    ) -> Result<HashMap<RowKey, Row>> {
        let mut inner = self.inner.lock();
        if inner.fail_reads {
            return Err(IndexerError::storage(format!("read of {} failed", table)));
        }
        inner
            .reads
            .entry(table.to_string())
            .or_default()
            .push(keys.iter().cloned().collect());

        let Some(rows) = inner.tables.get(table) else {
            return Ok(HashMap::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| rows.get(k).map(|row| (k.clone(), row.project(columns))))
            .collect())
    }

    async fn read_by_index(
        &mut self,
        table: &str,
        index_column: &str,
        key: &RowKey,
        columns: &[&str],
    ) -> Result<Vec<Row>> {
        let mut inner = self.inner.lock();
        if inner.fail_reads {
            return Err(IndexerError::storage(format!("read of {} failed", table)));
        }
        inner
            .reads
            .entry(table.to_string())
            .or_default()
            .push(vec![key.clone()]);

        let wanted = key.0.first().copied();
        Ok(inner
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.get_i64(index_column) == wanted)
                    .map(|row| row.project(columns))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.lock().commits += 1;
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.inner.lock().aborts += 1;
        Ok(())
    }
}

// ============================================================================
// Memory Change Log
// ============================================================================

#[derive(Debug, Default)]
struct LogInner {
    rows: BTreeMap<LogId, ChangeLogEntry>,
    deleted: Vec<BTreeSet<LogId>>,
    fail_deletes: bool,
}

/// In-memory change-log table.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: ChangeLogEntry) {
        self.inner.lock().rows.insert(entry.log_id, entry);
    }

    pub fn contains(&self, log_id: LogId) -> bool {
        self.inner.lock().rows.contains_key(&log_id)
    }

    /// Remaining log ids, ascending.
    pub fn log_ids(&self) -> Vec<LogId> {
        self.inner.lock().rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }

    /// Id sets passed to [`ChangeLogStore::delete`], one per call.
    pub fn delete_calls(&self) -> Vec<BTreeSet<LogId>> {
        self.inner.lock().deleted.clone()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inner.lock().fail_deletes = fail;
    }
}

#[async_trait]
impl ChangeLogStore for MemoryChangeLog {
    async fn read_pending(&self, limit: usize) -> Result<Vec<ChangeLogEntry>> {
        Ok(self
            .inner
            .lock()
            .rows
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, log_ids: &BTreeSet<LogId>) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.fail_deletes {
            return Err(IndexerError::storage("log delete failed"));
        }
        inner.deleted.push(log_ids.clone());
        Ok(log_ids
            .iter()
            .filter(|id| inner.rows.remove(*id).is_some())
            .count())
    }
}

// ============================================================================
// Mock Bulk Client
// ============================================================================

/// Scripted reply for [`MockBulkClient`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 200 with every item successful
    Ok,
    /// Status code with an empty body
    Status(u16),
    /// Connection-level failure
    TransportError,
    /// 200 with `errors: true`; the listed item positions fail
    ItemFailures(Vec<usize>),
    /// 200 with the given raw body
    Body(String),
}

#[derive(Debug, Default)]
struct ClientInner {
    bulk_script: VecDeque<MockResponse>,
    submitted: Vec<String>,
}

/// Bulk client that records requests and replies from a script. An empty
/// script answers [`MockResponse::Ok`].
#[derive(Debug, Clone, Default)]
pub struct MockBulkClient {
    inner: Arc<Mutex<ClientInner>>,
}

impl MockBulkClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next bulk request.
    pub fn push_response(&self, response: MockResponse) {
        self.inner.lock().bulk_script.push_back(response);
    }

    /// Bulk bodies received, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.inner.lock().submitted.clone()
    }

    fn reply(script: MockResponse, items: usize) -> Result<BulkResponse> {
        let item = |status: u16, failed: bool| {
            if failed {
                json!({"update": {"status": status, "error": {"type": "mapper_parsing_exception"}}})
            } else {
                json!({"update": {"status": status}})
            }
        };
        match script {
            MockResponse::Ok => Ok(BulkResponse::ok(
                json!({
                    "took": 1,
                    "errors": false,
                    "items": (0..items).map(|_| item(200, false)).collect::<Vec<_>>(),
                })
                .to_string(),
            )),
            MockResponse::Status(status) => Ok(BulkResponse {
                success: true,
                http_status: status,
                raw_response: String::new(),
            }),
            MockResponse::TransportError => {
                Err(IndexerError::transport("connection refused"))
            }
            MockResponse::ItemFailures(failing) => Ok(BulkResponse::ok(
                json!({
                    "took": 1,
                    "errors": true,
                    "items": (0..items)
                        .map(|i| {
                            if failing.contains(&i) {
                                item(400, true)
                            } else {
                                item(200, false)
                            }
                        })
                        .collect::<Vec<_>>(),
                })
                .to_string(),
            )),
            MockResponse::Body(body) => Ok(BulkResponse::ok(body)),
        }
    }
}

#[async_trait]
impl BulkIndexClient for MockBulkClient {
    async fn submit(&self, payload: &BulkPayload) -> Result<BulkResponse> {
        let script = {
            let mut inner = self.inner.lock();
            inner.submitted.push(payload.to_ndjson());
            inner.bulk_script.pop_front().unwrap_or(MockResponse::Ok)
        };
        Self::reply(script, payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChangeOp, CompositeKey};

    #[tokio::test]
    async fn test_memory_store_reads_and_counts() {
        let store = MemoryMetadataStore::new();
        store.add_template(1, "meta");
        let mut handle = store.clone();

        let keys = BTreeSet::from([RowKey::single(1), RowKey::single(2)]);
        let rows = handle
            .read_by_keys(META_TEMPLATES, &keys, &["name"])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&RowKey::single(1)].get_str("name"), Some("meta"));
        assert_eq!(rows[&RowKey::single(1)].get("templateid"), None);
        assert_eq!(store.read_calls(META_TEMPLATES), 1);
    }

    #[tokio::test]
    async fn test_change_log_delete_tolerates_missing_ids() {
        let log = MemoryChangeLog::new();
        log.append(ChangeLogEntry::new(
            1,
            CompositeKey::new(1, 1, 1),
            ChangeOp::Add,
        ));

        let removed = log.delete(&BTreeSet::from([1, 2])).await.unwrap();
        assert_eq!(removed, 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_mock_client_script() {
        let client = MockBulkClient::new();
        client.push_response(MockResponse::Status(503));
        let payload = BulkPayload::default();

        assert!(!client.submit(&payload).await.unwrap().is_ok());
        assert!(client.submit(&payload).await.unwrap().is_ok());
        assert_eq!(client.submitted().len(), 2);
    }
}
