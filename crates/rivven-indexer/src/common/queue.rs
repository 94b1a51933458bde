//! # Ordered Change Queue
//!
//! Priority queue of change-log entries ordered by ascending `log_id`.
//!
//! The log tailer pushes entries as they arrive (not necessarily in id order
//! when several tailer tasks are active); the batch cycle drains up to N of
//! the lowest ids in a single locked operation. The lock is held only for the
//! heap operation itself, never across I/O.
//!
//! ```ignore
//! let queue = OrderedChangeQueue::new();
//! queue.push(entry);
//! let batch = queue.drain_up_to(1000);
//! ```

use crate::common::{ChangeLogEntry, LogId};
use parking_lot::Mutex;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Heap slot ordered by log id only.
#[derive(Debug)]
struct QueuedEntry(ChangeLogEntry);

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.log_id == other.0.log_id
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.log_id.cmp(&other.0.log_id)
    }
}

/// Thread-safe min-heap of change-log entries keyed by `log_id`.
#[derive(Debug, Default)]
pub struct OrderedChangeQueue {
    heap: Mutex<BinaryHeap<Reverse<QueuedEntry>>>,
    available: Notify,
    pushed: AtomicU64,
    drained: AtomicU64,
}

impl OrderedChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. O(log n); never waits on a consumer.
    pub fn push(&self, entry: ChangeLogEntry) {
        self.heap.lock().push(Reverse(QueuedEntry(entry)));
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Insert several entries under one lock acquisition.
    pub fn push_all(&self, entries: impl IntoIterator<Item = ChangeLogEntry>) {
        let mut count = 0u64;
        {
            let mut heap = self.heap.lock();
            for entry in entries {
                heap.push(Reverse(QueuedEntry(entry)));
                count += 1;
            }
        }
        if count > 0 {
            self.pushed.fetch_add(count, Ordering::Relaxed);
            self.available.notify_one();
        }
    }

    /// Atomically remove up to `max_count` entries, lowest `log_id` first.
    ///
    /// Returns everything queued if fewer than `max_count` entries are present.
    pub fn drain_up_to(&self, max_count: usize) -> Vec<ChangeLogEntry> {
        let mut heap = self.heap.lock();
        let take = max_count.min(heap.len());
        let mut out = Vec::with_capacity(take);
        while out.len() < take {
            match heap.pop() {
                Some(Reverse(QueuedEntry(entry))) => out.push(entry),
                None => break,
            }
        }
        drop(heap);
        self.drained.fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    /// Wait until at least one entry is queued, then drain up to `max_count`.
    pub async fn drain_wait(&self, max_count: usize) -> Vec<ChangeLogEntry> {
        loop {
            let notified = self.available.notified();
            let batch = self.drain_up_to(max_count);
            if !batch.is_empty() || max_count == 0 {
                return batch;
            }
            notified.await;
        }
    }

    /// Lowest queued log id, if any.
    pub fn peek_log_id(&self) -> Option<LogId> {
        self.heap.lock().peek().map(|Reverse(e)| e.0.log_id)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Total entries ever pushed (including requeued entries).
    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total entries ever drained.
    pub fn total_drained(&self) -> u64 {
        self.drained.load(Ordering::Relaxed)
    }
}
