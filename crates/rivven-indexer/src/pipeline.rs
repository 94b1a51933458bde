//! # Indexer Pipeline
//!
//! Wires the queue, scheduler, reader pool and flush coordinator into one
//! change-log → search-index projection.
//!
//! ## Cycle
//!
//! ```text
//! drain ≤ batch_size ─┬─► dispatch to workers ─► flush ─► delete confirmed log rows
//!     retry set ──────┘                                └──► carry everything else
//! ```
//!
//! A log row is deleted only once every operation that carries its id was
//! confirmed by the index, or when its change needed no index write at all.
//!
//! Entries that reached the index path but were not confirmed (an unresolved
//! record, a rejected item) move to a retry set that rejoins every following
//! cycle on top of the fresh batch. They never count against `batch_size`, so
//! records that stay unresolvable cannot block newer changes, and a newer
//! change to the same key still meets its retained predecessor and supersedes
//! it. When the cycle fails as a whole (transport, storage or log deletion),
//! fresh entries go back into the queue instead.
//!
//! A scheduled cycle that leaves a full batch in the queue triggers the next
//! cycle right away.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rivven_indexer::{ElasticBulkClient, Indexer, IndexerConfig};
//!
//! let config = IndexerConfig::from_file("indexer.yaml")?;
//! let client = Arc::new(ElasticBulkClient::new(&config.index)?);
//! let indexer = Indexer::new(config, stores, change_log, client)?;
//!
//! indexer.recover().await?;
//! indexer.start();
//! // tailer: indexer.push(entry) for every new log row
//! indexer.shutdown();
//! indexer.wait_to_finish().await?;
//! ```

use crate::bulk::BulkFlushCoordinator;
use crate::common::{
    BatchHandler, BatchScheduler, BulkIndexClient, ChangeLogEntry, ChangeLogStore, IndexerConfig,
    IndexerError, IndexerMetrics, LogId, MetadataStore, OrderedChangeQueue, Result,
    SchedulerState, TimerReset,
};
use crate::pool::ReaderWorkerPool;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Summary of one batch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries taken from the queue
    pub drained: usize,
    /// Entries taken from the retry set
    pub retried: usize,
    /// Entries replaced by a newer change to the same key
    pub superseded: usize,
    /// Index operations built
    pub operations: usize,
    /// Log ids confirmed by the index
    pub succeeded: usize,
    /// Log ids whose operations failed
    pub failed: usize,
    /// Records left unresolved for a later cycle
    pub skipped: usize,
    /// Log rows deleted
    pub deleted: usize,
    /// Entries pushed back into the queue
    pub requeued: usize,
    /// Entries held in the retry set for the next cycle
    pub held: usize,
    /// Whether every step of the cycle reached its backend
    pub index_ok: bool,
}

/// The change-log indexer.
pub struct Indexer {
    config: IndexerConfig,
    inner: Arc<IndexerInner>,
    scheduler: BatchScheduler,
}

struct IndexerInner {
    queue: OrderedChangeQueue,
    /// Unconfirmed entries, retried every cycle outside the batch budget
    retry: Mutex<BTreeMap<LogId, ChangeLogEntry>>,
    pool: ReaderWorkerPool,
    coordinator: BulkFlushCoordinator,
    change_log: Arc<dyn ChangeLogStore>,
    metrics: Arc<IndexerMetrics>,
    batch_size: usize,
    /// Manual and scheduled cycles never overlap
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Indexer {
    /// Build an indexer with one reader worker per store. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: IndexerConfig,
        stores: Vec<Box<dyn MetadataStore>>,
        change_log: Arc<dyn ChangeLogStore>,
        client: Arc<dyn BulkIndexClient>,
    ) -> Result<Self> {
        config.validate()?;
        if stores.len() != config.num_readers {
            return Err(IndexerError::config(format!(
                "num_readers is {} but {} storage connections were provided",
                config.num_readers,
                stores.len()
            )));
        }

        let metrics = Arc::new(IndexerMetrics::new(config.name.clone()));
        let pool = ReaderWorkerPool::new(stores, config.reader, &config.index, config.lru_capacity)?;
        let coordinator = BulkFlushCoordinator::new(client, metrics.clone());
        let scheduler = BatchScheduler::new(config.scheduler_config());

        let inner = Arc::new(IndexerInner {
            queue: OrderedChangeQueue::new(),
            retry: Mutex::new(BTreeMap::new()),
            pool,
            coordinator,
            change_log,
            metrics,
            batch_size: config.batch_size,
            cycle_lock: tokio::sync::Mutex::new(()),
        });

        info!(
            "Indexer '{}' ready: {} readers, batch size {}, index '{}'",
            config.name, config.num_readers, config.batch_size, config.index.index_name
        );

        Ok(Self {
            config,
            inner,
            scheduler,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn queue(&self) -> &OrderedChangeQueue {
        &self.inner.queue
    }

    /// Log ids waiting in the retry set, lowest first.
    pub fn pending_retries(&self) -> Vec<LogId> {
        self.inner.retry.lock().keys().copied().collect()
    }

    pub fn metrics(&self) -> &IndexerMetrics {
        &self.inner.metrics
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    /// Enqueue a new change. A full batch triggers the next cycle early.
    pub fn push(&self, entry: ChangeLogEntry) {
        self.inner.metrics.record_queued(1);
        self.inner.queue.push(entry);
        self.trigger_if_full();
    }

    pub fn push_all(&self, entries: impl IntoIterator<Item = ChangeLogEntry>) {
        let entries: Vec<ChangeLogEntry> = entries.into_iter().collect();
        self.inner.metrics.record_queued(entries.len() as u64);
        self.inner.queue.push_all(entries);
        self.trigger_if_full();
    }

    fn trigger_if_full(&self) {
        let running = !matches!(
            self.scheduler.state(),
            SchedulerState::Idle | SchedulerState::Stopped
        );
        if running && self.inner.queue.len() >= self.inner.batch_size {
            self.scheduler.reset_timer();
        }
    }

    /// Load rows already in the change log into the queue. Meant to run once
    /// before [`Indexer::start`].
    pub async fn recover(&self) -> Result<usize> {
        let entries = self
            .inner
            .change_log
            .read_pending(self.config.recovery_limit)
            .await?;
        let count = entries.len();
        if count == self.config.recovery_limit {
            warn!(
                "Recovery hit the limit of {} entries; the rest is picked up as the log drains",
                count
            );
        }
        self.push_all(entries);
        info!("Indexer '{}' recovered {} pending entries", self.config.name, count);
        Ok(count)
    }

    /// Start periodic cycles.
    pub fn start(&self) {
        self.scheduler.start(Arc::new(IndexCycle {
            inner: self.inner.clone(),
            timer: self.scheduler.reset_handle(),
        }));
    }

    /// Request shutdown. One final cycle runs right away.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.scheduler.reset_timer();
    }

    /// Wait for the final cycle, then stop the reader workers.
    pub async fn wait_to_finish(&self) -> Result<()> {
        self.scheduler.wait_to_finish().await?;
        self.inner.pool.shutdown().await;
        info!("Indexer '{}' stopped", self.config.name);
        Ok(())
    }

    /// Run one cycle now. Waits for a scheduled cycle in progress.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.inner.run_cycle().await
    }
}

impl IndexerInner {
    async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;

        let drained = self.queue.drain_up_to(self.batch_size);
        let retried: Vec<ChangeLogEntry> = std::mem::take(&mut *self.retry.lock())
            .into_values()
            .collect();
        if drained.is_empty() && retried.is_empty() {
            return Ok(CycleReport {
                index_ok: true,
                ..Default::default()
            });
        }
        self.metrics.record_drained(drained.len() as u64);

        let mut report = CycleReport {
            drained: drained.len(),
            retried: retried.len(),
            ..Default::default()
        };

        let mut batch: Vec<ChangeLogEntry> = retried.iter().chain(&drained).cloned().collect();
        batch.sort_by_key(|e| e.log_id);

        let mut operations = Vec::new();
        let mut deletable: BTreeSet<LogId> = BTreeSet::new();
        let mut readers_ok = true;
        for outcome in self.pool.dispatch(batch).await {
            report.superseded += outcome.superseded;
            report.skipped += outcome.retained.len();
            readers_ok &= !outcome.failed;
            self.metrics.record_coercion_errors(outcome.coercion_errors);
            self.metrics
                .record_cache(outcome.cache_hits, outcome.cache_misses);
            operations.extend(outcome.operations);
            deletable.extend(outcome.completed);
        }
        report.operations = operations.len();
        self.metrics.record_superseded(report.superseded as u64);
        self.metrics.record_operations(operations.len() as u64);
        self.metrics.record_skipped(report.skipped as u64);

        let result = self.coordinator.submit(&operations).await;
        report.succeeded = result.succeeded.len();
        report.failed = result.failed.len();
        deletable.extend(result.succeeded);

        let deleted = self.delete_confirmed(deletable).await;
        let delete_ok = deleted.is_ok();
        let deleted = deleted.unwrap_or_default();
        report.deleted = deleted.len();
        report.index_ok = result.overall_ok && readers_ok && delete_ok;

        // Retried entries stay in the retry set; fresh ones join it only when
        // the cycle itself went through.
        let (hold, requeue): (Vec<ChangeLogEntry>, Vec<ChangeLogEntry>) = drained
            .into_iter()
            .filter(|e| !deleted.contains(&e.log_id))
            .partition(|_| report.index_ok);
        let hold: Vec<ChangeLogEntry> = retried
            .into_iter()
            .filter(|e| !deleted.contains(&e.log_id))
            .chain(hold)
            .collect();

        report.requeued = requeue.len();
        report.held = hold.len();
        self.metrics.record_requeued((requeue.len() + hold.len()) as u64);
        self.queue.push_all(requeue);
        self.retry
            .lock()
            .extend(hold.into_iter().map(|e| (e.log_id, e)));

        self.metrics.record_cycle(report.index_ok);

        debug!(
            "Cycle: drained={} retried={} superseded={} operations={} succeeded={} failed={} skipped={} deleted={} requeued={} held={}",
            report.drained,
            report.retried,
            report.superseded,
            report.operations,
            report.succeeded,
            report.failed,
            report.skipped,
            report.deleted,
            report.requeued,
            report.held
        );

        Ok(report)
    }

    /// A full batch is still waiting after a cycle that made progress.
    fn backlog_full(&self, report: &CycleReport) -> bool {
        report.index_ok && report.drained > 0 && self.queue.len() >= self.batch_size
    }

    /// Delete confirmed rows from the change log. On failure nothing counts
    /// as deleted and the whole batch is retried.
    async fn delete_confirmed(&self, log_ids: BTreeSet<LogId>) -> Result<BTreeSet<LogId>> {
        if log_ids.is_empty() {
            return Ok(log_ids);
        }
        match self.change_log.delete(&log_ids).await {
            Ok(removed) => {
                self.metrics.record_deleted(removed as u64);
                Ok(log_ids)
            }
            Err(e) => {
                error!(
                    "Failed to delete {} confirmed log rows [{}]: {}",
                    log_ids.len(),
                    e.error_code(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// Scheduled cycle handler.
struct IndexCycle {
    inner: Arc<IndexerInner>,
    timer: TimerReset,
}

#[async_trait]
impl BatchHandler for IndexCycle {
    async fn process_batch(&self) {
        match self.inner.run_cycle().await {
            Ok(report) if self.inner.backlog_full(&report) => {
                debug!(
                    "{} entries still queued after cycle, firing again",
                    self.inner.queue.len()
                );
                self.timer.reset_timer();
            }
            Ok(_) => {}
            Err(e) => error!("Index cycle failed: {}", e),
        }
    }
}
