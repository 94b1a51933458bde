//! # Metadata Resolution Caches
//!
//! Fixed-capacity LRU caches for schema descriptors.
//!
//! Each reader worker owns one [`MetadataCaches`] instance; nothing is shared
//! across workers, so no locking is needed. Descriptors are immutable for the
//! life of the process, so entries are only ever evicted, never invalidated.
//!
//! ```ignore
//! let mut caches = MetadataCaches::new(10_000);
//! caches.fields.put(2, field);
//! assert!(caches.fields.contains(&2));
//! ```

use crate::common::{Field, IndexerError, Result, Table, Template};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;

/// Least-recently-used map from id to descriptor.
///
/// Recency is tracked with a monotonically increasing tick; the smallest
/// tick in `order` is the eviction candidate.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `key`, marking it most recently used.
    ///
    /// Fails with [`IndexerError::NotFound`] when absent.
    pub fn get(&mut self, key: &K) -> Result<V> {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some((value, last_used)) => {
                self.order.remove(last_used);
                *last_used = tick;
                self.order.insert(tick, key.clone());
                self.hits += 1;
                Ok(value.clone())
            }
            None => {
                self.misses += 1;
                Err(IndexerError::not_found(format!("cache key {}", key)))
            }
        }
    }

    /// Presence check; does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// the cache is full.
    pub fn put(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, last_used)) = self.entries.get(&key) {
            self.order.remove(last_used);
        } else if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.order.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
    }

    fn evict_one(&mut self) {
        if let Some((_, victim)) = self.order.pop_first() {
            self.entries.remove(&victim);
            self.evictions += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

/// The three per-worker schema caches.
#[derive(Debug)]
pub struct MetadataCaches {
    pub fields: LruCache<i64, Field>,
    pub tables: LruCache<i64, Table>,
    pub templates: LruCache<i64, Template>,
}

impl MetadataCaches {
    /// Create caches that each hold up to `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        Self {
            fields: LruCache::new(capacity),
            tables: LruCache::new(capacity),
            templates: LruCache::new(capacity),
        }
    }

    /// Total hits across all three caches.
    pub fn hits(&self) -> u64 {
        self.fields.hits() + self.tables.hits() + self.templates.hits()
    }

    /// Total misses across all three caches.
    pub fn misses(&self) -> u64 {
        self.fields.misses() + self.tables.misses() + self.templates.misses()
    }
}
