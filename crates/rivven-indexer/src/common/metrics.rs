//! # Indexer Metrics
//!
//! Atomic counters for the pipeline, mirrored to the `metrics` crate facade.
//!
//! ## Metrics Export
//!
//! Every counter is also emitted as `rivven_indexer_*` with an `indexer`
//! label, compatible with any exporter installed by the host process
//! (Prometheus, Statsd, ...). Without an installed recorder the facade calls
//! are no-ops.
//!
//! ## Usage
//!
//! ```ignore
//! use rivven_indexer::common::IndexerMetrics;
//!
//! let metrics = IndexerMetrics::new("projects");
//! metrics.record_drained(128);
//! let snapshot = metrics.snapshot();
//! println!("drained: {}", snapshot.entries_drained);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Indexer metrics collector with atomic counters for lock-free updates.
#[derive(Debug)]
pub struct IndexerMetrics {
    /// Label value for the facade
    name: String,

    // Queue
    entries_queued: AtomicU64,
    entries_drained: AtomicU64,
    entries_requeued: AtomicU64,

    // Cycles
    cycles: AtomicU64,
    cycles_failed: AtomicU64,

    // Readers
    superseded: AtomicU64,
    operations_built: AtomicU64,
    records_skipped: AtomicU64,
    coercion_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // Flush
    bulk_requests: AtomicU64,
    bulk_failures: AtomicU64,
    items_failed: AtomicU64,
    log_rows_deleted: AtomicU64,
}

impl IndexerMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries_queued: AtomicU64::new(0),
            entries_drained: AtomicU64::new(0),
            entries_requeued: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            operations_built: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            coercion_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            bulk_requests: AtomicU64::new(0),
            bulk_failures: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            log_rows_deleted: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn bump(&self, counter: &AtomicU64, metric: &'static str, n: u64) {
        if n == 0 {
            return;
        }
        counter.fetch_add(n, Ordering::Relaxed);
        metrics::counter!(metric, "indexer" => self.name.clone()).increment(n);
    }

    /// Entries pushed by the log tailer or recovery.
    #[inline]
    pub fn record_queued(&self, n: u64) {
        self.bump(&self.entries_queued, "rivven_indexer_entries_queued_total", n);
    }

    #[inline]
    pub fn record_drained(&self, n: u64) {
        self.bump(&self.entries_drained, "rivven_indexer_entries_drained_total", n);
    }

    #[inline]
    pub fn record_requeued(&self, n: u64) {
        self.bump(
            &self.entries_requeued,
            "rivven_indexer_entries_requeued_total",
            n,
        );
    }

    /// Record a completed cycle and whether it reached the index.
    pub fn record_cycle(&self, ok: bool) {
        self.bump(&self.cycles, "rivven_indexer_cycles_total", 1);
        if !ok {
            self.bump(&self.cycles_failed, "rivven_indexer_cycles_failed_total", 1);
        }
    }

    #[inline]
    pub fn record_superseded(&self, n: u64) {
        self.bump(&self.superseded, "rivven_indexer_superseded_total", n);
    }

    #[inline]
    pub fn record_operations(&self, n: u64) {
        self.bump(
            &self.operations_built,
            "rivven_indexer_operations_built_total",
            n,
        );
    }

    #[inline]
    pub fn record_skipped(&self, n: u64) {
        self.bump(&self.records_skipped, "rivven_indexer_records_skipped_total", n);
    }

    #[inline]
    pub fn record_coercion_errors(&self, n: u64) {
        self.bump(
            &self.coercion_errors,
            "rivven_indexer_coercion_errors_total",
            n,
        );
    }

    pub fn record_cache(&self, hits: u64, misses: u64) {
        self.bump(&self.cache_hits, "rivven_indexer_cache_hits_total", hits);
        self.bump(&self.cache_misses, "rivven_indexer_cache_misses_total", misses);
    }

    pub fn record_bulk_request(&self, ok: bool) {
        self.bump(&self.bulk_requests, "rivven_indexer_bulk_requests_total", 1);
        if !ok {
            self.bump(&self.bulk_failures, "rivven_indexer_bulk_failures_total", 1);
        }
    }

    #[inline]
    pub fn record_items_failed(&self, n: u64) {
        self.bump(&self.items_failed, "rivven_indexer_items_failed_total", n);
    }

    #[inline]
    pub fn record_deleted(&self, n: u64) {
        self.bump(
            &self.log_rows_deleted,
            "rivven_indexer_log_rows_deleted_total",
            n,
        );
    }

    pub fn snapshot(&self) -> IndexerMetricsSnapshot {
        IndexerMetricsSnapshot {
            entries_queued: self.entries_queued.load(Ordering::Relaxed),
            entries_drained: self.entries_drained.load(Ordering::Relaxed),
            entries_requeued: self.entries_requeued.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            operations_built: self.operations_built.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            coercion_errors: self.coercion_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            bulk_requests: self.bulk_requests.load(Ordering::Relaxed),
            bulk_failures: self.bulk_failures.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            log_rows_deleted: self.log_rows_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IndexerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexerMetricsSnapshot {
    pub entries_queued: u64,
    pub entries_drained: u64,
    pub entries_requeued: u64,
    pub cycles: u64,
    pub cycles_failed: u64,
    pub superseded: u64,
    pub operations_built: u64,
    pub records_skipped: u64,
    pub coercion_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bulk_requests: u64,
    pub bulk_failures: u64,
    pub items_failed: u64,
    pub log_rows_deleted: u64,
}

impl IndexerMetricsSnapshot {
    /// Cache hit rate (0.0 - 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}
