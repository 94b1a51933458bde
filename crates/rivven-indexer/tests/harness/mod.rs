//! Shared fixtures for indexer integration tests.
//!
//! Builds an [`Indexer`] over the in-memory collaborators from
//! `rivven_indexer::testing` and seeds a small metadata catalog.

#![allow(dead_code)]

use rivven_indexer::common::FieldType;
use rivven_indexer::testing::{MemoryChangeLog, MemoryMetadataStore, MockBulkClient};
use rivven_indexer::{
    ChangeLogEntry, ChangeOp, CompositeKey, Indexer, IndexerConfig, LogId, MetadataStore,
    ReaderKind,
};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_indexer=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Field 2 "status" (Text) and field 3 "size" (Int) in table 7 "t1" of
/// template 1 "meta"; field 4 "notes" is not searchable. Tuple 100 maps to
/// inode 55, tuple 200 to inode 66.
pub fn catalog() -> MemoryMetadataStore {
    let store = MemoryMetadataStore::new();
    store.add_template(1, "meta");
    store.add_table(7, "t1", 1);
    store.add_field(2, "status", 7, true, FieldType::Text);
    store.add_field(3, "size", 7, true, FieldType::Int);
    store.add_field(4, "notes", 7, false, FieldType::Text);
    store.add_tuple(100, 55);
    store.add_tuple(200, 66);
    store
}

pub struct TestIndexer {
    pub indexer: Indexer,
    pub store: MemoryMetadataStore,
    pub log: MemoryChangeLog,
    pub client: MockBulkClient,
}

impl TestIndexer {
    /// Write `entry` to the change log and hand it to the indexer, the way a
    /// log tailer would.
    pub fn append(&self, entry: ChangeLogEntry) {
        self.log.append(entry.clone());
        self.indexer.push(entry);
    }

    pub fn append_all(&self, entries: impl IntoIterator<Item = ChangeLogEntry>) {
        for entry in entries {
            self.append(entry);
        }
    }
}

pub struct TestIndexerBuilder {
    store: MemoryMetadataStore,
    readers: usize,
    batch_size: usize,
    lru_capacity: usize,
    interval: Duration,
    reader: ReaderKind,
}

impl TestIndexerBuilder {
    pub fn new(store: MemoryMetadataStore) -> Self {
        Self {
            store,
            readers: 2,
            batch_size: 100,
            lru_capacity: 1000,
            interval: Duration::from_millis(1000),
            reader: ReaderKind::SchemaBased,
        }
    }

    pub fn readers(mut self, readers: usize) -> Self {
        self.readers = readers;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn lru_capacity(mut self, capacity: usize) -> Self {
        self.lru_capacity = capacity;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn reader(mut self, reader: ReaderKind) -> Self {
        self.reader = reader;
        self
    }

    pub fn build(self) -> anyhow::Result<TestIndexer> {
        let config = IndexerConfig::builder()
            .name("it")
            .num_readers(self.readers)
            .batch_size(self.batch_size)
            .lru_capacity(self.lru_capacity)
            .batch_interval(self.interval)
            .reader(self.reader)
            .build()?;

        let log = MemoryChangeLog::new();
        let client = MockBulkClient::new();
        let stores: Vec<Box<dyn MetadataStore>> = (0..self.readers)
            .map(|_| Box::new(self.store.clone()) as Box<dyn MetadataStore>)
            .collect();
        let indexer = Indexer::new(
            config,
            stores,
            Arc::new(log.clone()),
            Arc::new(client.clone()),
        )?;

        Ok(TestIndexer {
            indexer,
            store: self.store,
            log,
            client,
        })
    }
}

pub fn entry(log_id: LogId, key: (i64, i64, i64), op: ChangeOp) -> ChangeLogEntry {
    ChangeLogEntry::new(log_id, CompositeKey::new(key.0, key.1, key.2), op)
}

/// Bulk body lines, parsed.
pub fn ndjson_lines(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
