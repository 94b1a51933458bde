//! # rivven-indexer - Change-log to search-index projection for Rivven
//!
//! Keeps a search index in sync with a metadata store by tailing its change
//! log. Changes are queued in `log_id` order, collapsed per key, resolved
//! against the metadata catalog by a pool of reader workers and flushed to the
//! index in one bulk request per cycle. A log row is deleted only after the
//! index confirmed the write it caused.
//!
//! ## Features
//!
//! - Jittered periodic batching with early trigger on a full batch
//! - Highest-`log_id`-wins deduplication per key
//! - Per-worker LRU caches for field, table and template descriptors
//! - Two reader strategies: schema-based metadata and generic extended attributes
//! - Per-item bulk result handling; unconfirmed entries are retried in order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │ change log  │──▶│ OrderedChangeQueue │──▶│  BatchScheduler  │
//! │  (tailer)   │   └────────────────────┘   └────────┬─────────┘
//! └──────▲──────┘                                     │ cycle
//!        │                                            ▼
//!        │         ┌──────────────────────────────────────────────┐
//!        │         │ ReaderWorkerPool                             │
//!        │         │  worker 0..N: dedup ─▶ caches ─▶ operations  │
//!        │         └───────────────────────┬──────────────────────┘
//!        │                                 ▼
//!        │ delete confirmed   ┌──────────────────────────┐
//!        └────────────────────│   BulkFlushCoordinator   │──▶ search index
//!                             └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> rivven_indexer::Result<()> {
//! use std::sync::Arc;
//! use rivven_indexer::testing::{MemoryChangeLog, MemoryMetadataStore};
//! use rivven_indexer::{ElasticBulkClient, Indexer, IndexerConfig, MetadataStore};
//!
//! let config = IndexerConfig::builder()
//!     .index_url("http://localhost:9200")
//!     .num_readers(2)
//!     .build()?;
//! let client = Arc::new(ElasticBulkClient::new(&config.index)?);
//! let stores: Vec<Box<dyn MetadataStore>> = vec![
//!     Box::new(MemoryMetadataStore::new()),
//!     Box::new(MemoryMetadataStore::new()),
//! ];
//!
//! let indexer = Indexer::new(config, stores, Arc::new(MemoryChangeLog::new()), client)?;
//! indexer.recover().await?;
//! indexer.start();
//!
//! indexer.shutdown();
//! indexer.wait_to_finish().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! ### Tier 1: Pipeline (crate root)
//! `Indexer`, its configuration, error type and collaborator traits.
//!
//! ### Tier 2: Components (crate root)
//! Queue, scheduler, readers, worker pool, flush coordinator and HTTP client,
//! for callers assembling their own pipeline.
//!
//! ### Tier 3: Building blocks (`common` module)
//! Caches, deduplication, schema descriptors, payload encoding.

pub mod bulk;
pub mod common;
pub mod http;
pub mod pipeline;
pub mod pool;
pub mod reader;
pub mod testing;

// =============================================================================
// TIER 1: Pipeline
// =============================================================================

pub use common::{
    // Collaborators
    BulkIndexClient,
    BulkResponse,
    // Change log
    ChangeLogEntry,
    ChangeLogStore,
    ChangeOp,
    CompositeKey,
    ErrorCategory,
    // Configuration
    IndexConfig,
    // Errors
    IndexerError,
    IndexerConfig,
    IndexerConfigBuilder,
    IndexerMetrics,
    IndexerMetricsSnapshot,
    LogId,
    MetadataStore,
    ReaderKind,
    Result,
    Row,
    RowKey,
};
pub use pipeline::{CycleReport, Indexer};

// =============================================================================
// TIER 2: Components
// =============================================================================

pub use bulk::{parse_bulk_items, BulkFlushCoordinator};
pub use common::{
    BatchHandler, BatchResult, BatchScheduler, IndexOperation, OperationKind, OrderedChangeQueue,
    PendingOperation, SchedulerConfig, SchedulerState, TimerReset,
};
pub use http::ElasticBulkClient;
pub use pool::{ReaderWorkerPool, WorkerOutcome};
pub use reader::{MetadataReader, ReaderOutput, SchemaBasedReader, XAttrReader};

// =============================================================================
// TIER 3: Building blocks - via `common::`
// =============================================================================
// Not re-exported at the crate root:
//   - common::LruCache, MetadataCaches
//   - common::dedup_batch, DedupedBatch, DedupGroup
//   - common::FieldType, Field, Table, Template, coerce_value
//   - common::BulkPayload, merge_fragment, nested_fragment, REMOVE_PATH_SCRIPT
//   - common::first_fire_delay
