//! # Common Indexer Types
//!
//! Building blocks shared by the readers, the worker pool and the pipeline:
//!
//! - [`ChangeLogEntry`] - One row of the source change log
//! - [`OrderedChangeQueue`] - Log-id ordered queue between tailer and workers
//! - [`BatchScheduler`] - Jittered periodic trigger with early reset
//! - [`LruCache`] / [`MetadataCaches`] - Per-worker schema caches
//! - [`dedup_batch`] - Highest-log-id-wins batch collapsing
//! - [`IndexOperation`] / [`BulkPayload`] - Index writes and their encoding
//! - [`MetadataStore`], [`ChangeLogStore`], [`BulkIndexClient`] - Collaborator traits
//! - [`IndexerConfig`] - YAML configuration
//! - [`IndexerMetrics`] - Counters mirrored to the metrics facade
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌────────────────┐
//! │ log tail │──▶│OrderedChangeQueue│──▶│ BatchScheduler │
//! └──────────┘   └──────────────────┘   └───────┬────────┘
//!                                               │ cycle
//!                                               ▼
//!            ┌──────────────┐   ┌──────────────────────────┐
//!            │ log deletion │◀──│ workers ─▶ bulk flush    │
//!            └──────────────┘   └──────────────────────────┘
//! ```

mod cache;
mod config;
mod dedup;
mod entry;
mod error;
mod metrics;
mod operation;
mod queue;
mod scheduler;
mod schema;
mod traits;

pub use cache::*;
pub use config::*;
pub use dedup::*;
pub use entry::*;
pub use error::*;
pub use self::metrics::*;
pub use operation::*;
pub use queue::*;
pub use scheduler::*;
pub use schema::*;
pub use traits::*;
