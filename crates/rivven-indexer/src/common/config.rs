//! # Indexer Configuration
//!
//! YAML configuration with environment-variable expansion and declarative
//! validation.
//!
//! ```yaml
//! name: projects
//! batch_interval_ms: 1000
//! batch_size: 1000
//! num_readers: 4
//! lru_capacity: 10000
//! reader: schema_based
//! index:
//!   url: ${ELASTIC_URL:-http://127.0.0.1:9200}
//!   index_name: projects
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded before parsing; an unset
//! variable without a default expands to the empty string.

use crate::common::{IndexerError, Result, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Which reader strategy the worker pool runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderKind {
    /// Template/table/field catalog join
    #[default]
    SchemaBased,
    /// Generic extended attributes
    #[serde(rename = "xattr")]
    XAttr,
}

/// Search index endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IndexConfig {
    /// Base URL of the index, e.g. `http://127.0.0.1:9200`
    #[validate(url)]
    pub url: String,

    /// Index that receives the documents
    #[serde(default = "default_index_name")]
    #[validate(length(min = 1, max = 255))]
    pub index_name: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9200".to_string(),
            index_name: default_index_name(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Root indexer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IndexerConfig {
    /// Instance name, used in logs and metric labels
    #[serde(default = "default_name")]
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Batch period in milliseconds
    #[serde(default = "default_batch_interval_ms")]
    #[validate(range(min = 1, max = 3_600_000))]
    pub batch_interval_ms: u64,

    /// Maximum entries drained per cycle; reaching it in the queue triggers
    /// an early cycle
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,

    /// Number of reader workers
    #[serde(default = "default_num_readers")]
    #[validate(range(min = 1, max = 256))]
    pub num_readers: usize,

    /// Capacity of each per-worker schema cache
    #[serde(default = "default_lru_capacity")]
    #[validate(range(min = 1, max = 10_000_000))]
    pub lru_capacity: usize,

    /// Maximum log rows read by startup recovery
    #[serde(default = "default_recovery_limit")]
    #[validate(range(min = 1))]
    pub recovery_limit: usize,

    #[serde(default)]
    pub reader: ReaderKind,

    #[validate(nested)]
    pub index: IndexConfig,
}

fn default_name() -> String {
    "indexer".to_string()
}

fn default_batch_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    1000
}

fn default_num_readers() -> usize {
    4
}

fn default_lru_capacity() -> usize {
    10_000
}

fn default_recovery_limit() -> usize {
    100_000
}

fn default_index_name() -> String {
    "projects".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch_interval_ms: default_batch_interval_ms(),
            batch_size: default_batch_size(),
            num_readers: default_num_readers(),
            lru_capacity: default_lru_capacity(),
            recovery_limit: default_recovery_limit(),
            reader: ReaderKind::default(),
            index: IndexConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Create a new config builder.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate YAML, expanding environment variables first.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| IndexerError::config(format!("Invalid configuration: {}", e)))
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::builder()
            .interval(self.batch_interval())
            .name(self.name.clone())
            .build()
    }
}

/// Builder for IndexerConfig.
#[derive(Default)]
pub struct IndexerConfigBuilder {
    config: IndexerConfig,
}

impl IndexerConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the batch period.
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.config.batch_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn num_readers(mut self, n: usize) -> Self {
        self.config.num_readers = n;
        self
    }

    pub fn lru_capacity(mut self, capacity: usize) -> Self {
        self.config.lru_capacity = capacity;
        self
    }

    pub fn recovery_limit(mut self, limit: usize) -> Self {
        self.config.recovery_limit = limit;
        self
    }

    pub fn reader(mut self, reader: ReaderKind) -> Self {
        self.config.reader = reader;
        self
    }

    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.config.index.url = url.into();
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.config.index.index_name = name.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.index.timeout_secs = secs;
        self
    }

    /// Build and validate the config.
    pub fn build(self) -> Result<IndexerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
