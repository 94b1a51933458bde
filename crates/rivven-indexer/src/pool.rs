//! # Reader Worker Pool
//!
//! N independent reader workers, each a tokio task that owns one storage
//! connection and one [`MetadataReader`] (with its own schema caches).
//!
//! ## Dispatch
//!
//! A drained batch is partitioned by a hash of each entry's document key
//! (tuple for schema-based records, inode for extended attributes). Every
//! entry for a given key lands on the same worker, so deduplication stays
//! exact, and all changes to one document path are ordered by one worker.
//! Each worker:
//!
//! 1. deduplicates its partition (highest `log_id` per key wins)
//! 2. resolves rows and schema through its caches
//! 3. builds index operations
//! 4. replies with a [`WorkerOutcome`]
//!
//! A storage failure inside a worker retains its whole partition; the worker
//! itself keeps running.

use crate::common::{
    dedup_batch, ChangeLogEntry, CompositeKey, IndexConfig, IndexerError, LogId,
    MetadataStore, PendingOperation, ReaderKind, Result,
};
use crate::reader::{partition_key, MetadataReader};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Jobs buffered per worker.
const WORKER_INBOX: usize = 4;

/// What one worker produced for its partition of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    pub operations: Vec<PendingOperation>,
    /// Deletable without an index write
    pub completed: BTreeSet<LogId>,
    /// Not resolved this cycle
    pub retained: Vec<CompositeKey>,
    pub superseded: usize,
    pub coercion_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// The partition failed as a whole (storage error or worker gone)
    pub failed: bool,
}

impl WorkerOutcome {
    fn failed(worker_id: usize, keys: Vec<CompositeKey>) -> Self {
        Self {
            worker_id,
            retained: keys,
            failed: true,
            ..Default::default()
        }
    }
}

struct WorkerJob {
    entries: Vec<ChangeLogEntry>,
    reply: oneshot::Sender<WorkerOutcome>,
}

/// Fixed-size pool of reader workers.
pub struct ReaderWorkerPool {
    senders: Mutex<Vec<mpsc::Sender<WorkerJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
    kind: ReaderKind,
}

impl ReaderWorkerPool {
    /// Spawn one worker per store. Must be called inside a tokio runtime.
    pub fn new(
        stores: Vec<Box<dyn MetadataStore>>,
        kind: ReaderKind,
        index: &IndexConfig,
        lru_capacity: usize,
    ) -> Result<Self> {
        if stores.is_empty() {
            return Err(IndexerError::config(
                "reader pool needs at least one storage connection",
            ));
        }

        let num_workers = stores.len();
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for (worker_id, store) in stores.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(WORKER_INBOX);
            let reader = MetadataReader::new(kind, index, lru_capacity);
            handles.push(tokio::spawn(run_worker(worker_id, store, reader, rx)));
            senders.push(tx);
        }

        info!("Started {} {:?} reader workers", num_workers, kind);

        Ok(Self {
            senders: Mutex::new(senders),
            handles: Mutex::new(handles),
            num_workers,
            kind,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Worker index for `key`.
    pub fn partition_of(&self, key: &CompositeKey) -> usize {
        let mut hasher = DefaultHasher::new();
        partition_key(self.kind, key).hash(&mut hasher);
        (hasher.finish() % self.num_workers as u64) as usize
    }

    /// Run `entries` through the workers and collect one outcome per
    /// non-empty partition, in worker order.
    pub async fn dispatch(&self, entries: Vec<ChangeLogEntry>) -> Vec<WorkerOutcome> {
        if entries.is_empty() {
            return Vec::new();
        }

        let mut partitions: Vec<Vec<ChangeLogEntry>> = vec![Vec::new(); self.num_workers];
        for entry in entries {
            let worker = self.partition_of(&entry.key);
            partitions[worker].push(entry);
        }

        let senders = self.senders.lock().clone();

        let pending = partitions
            .into_iter()
            .enumerate()
            .filter(|(_, p)| !p.is_empty())
            .map(|(worker_id, partition)| {
                let sender = senders.get(worker_id).cloned();
                async move {
                    let keys: Vec<CompositeKey> = partition.iter().map(|e| e.key).collect();
                    let Some(sender) = sender else {
                        warn!("Reader worker {} unavailable, retaining partition", worker_id);
                        return WorkerOutcome::failed(worker_id, keys);
                    };

                    let (reply, response) = oneshot::channel();
                    let job = WorkerJob {
                        entries: partition,
                        reply,
                    };
                    if sender.send(job).await.is_err() {
                        warn!("Reader worker {} stopped, retaining partition", worker_id);
                        return WorkerOutcome::failed(worker_id, keys);
                    }

                    match response.await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!("Reader worker {} dropped its reply", worker_id);
                            WorkerOutcome::failed(worker_id, keys)
                        }
                    }
                }
            });

        join_all(pending).await
    }

    /// Close the worker inboxes and wait for every worker to exit. Jobs
    /// already queued are still processed.
    pub async fn shutdown(&self) {
        self.senders.lock().clear();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Reader worker task failed: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    mut store: Box<dyn MetadataStore>,
    mut reader: MetadataReader,
    mut inbox: mpsc::Receiver<WorkerJob>,
) {
    debug!("Reader worker {} started", worker_id);
    let (mut seen_hits, mut seen_misses) = (0u64, 0u64);

    while let Some(job) = inbox.recv().await {
        let batch = dedup_batch(job.entries);
        let superseded = batch.superseded_count();

        let mut outcome = match reader.process(store.as_mut(), &batch).await {
            Ok(output) => WorkerOutcome {
                worker_id,
                operations: output.operations,
                completed: output.completed,
                retained: output.retained,
                superseded,
                coercion_errors: output.coercion_errors,
                ..Default::default()
            },
            Err(e) => {
                error!(
                    "Reader worker {} failed on batch of {} records: {}",
                    worker_id,
                    batch.len(),
                    e
                );
                let mut outcome =
                    WorkerOutcome::failed(worker_id, batch.winners().map(|e| e.key).collect());
                outcome.superseded = superseded;
                outcome
            }
        };

        let (hits, misses) = reader.cache_stats();
        outcome.cache_hits = hits - seen_hits;
        outcome.cache_misses = misses - seen_misses;
        (seen_hits, seen_misses) = (hits, misses);

        if job.reply.send(outcome).is_err() {
            warn!("Reader worker {} reply receiver dropped", worker_id);
        }
    }

    info!("Reader worker {} stopped", worker_id);
}
