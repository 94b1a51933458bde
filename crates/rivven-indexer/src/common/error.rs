//! Error types for indexer operations
//!
//! Includes error classification so a failed cycle can be logged, counted and
//! retried without the caller knowing which collaborator failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Storage engine errors (connection, read, transaction)
    Storage,
    /// Schema resolution errors (unknown field, table, template)
    Schema,
    /// Transport errors talking to the search index
    Transport,
    /// Configuration errors (invalid settings, bad endpoint)
    Configuration,
    /// Serialization errors (JSON, YAML)
    Serialization,
    /// Other/unknown errors
    Other,
}

/// Indexer-specific errors
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Storage engine read or transaction error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A looked-up id is not present (cache miss, missing row)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schema descriptor could not be decoded
    #[error("Schema error: {0}")]
    Schema(String),

    /// Network-level failure talking to the index
    #[error("Transport error: {0}")]
    Transport(String),

    /// Index answered with a non-2xx status
    #[error("Bulk request rejected with status {status}: {body}")]
    BulkRejected { status: u16, body: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl IndexerError {
    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Retriable errors abort the current cycle only; the entries stay queued
    /// and the next cycle picks them up again.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Storage(_) => true,
            Self::NotFound(_) => true,
            Self::BulkRejected { status, .. } => *status >= 500 || *status == 429,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::Schema(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::InvalidState(_) => false,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_) => ErrorCategory::Storage,
            Self::NotFound(_) => ErrorCategory::Schema,
            Self::Schema(_) => ErrorCategory::Schema,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::BulkRejected { .. } => ErrorCategory::Transport,
            Self::Http(_) => ErrorCategory::Transport,
            Self::Io(_) => ErrorCategory::Transport,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Json(_) => ErrorCategory::Serialization,
            Self::Yaml(_) => ErrorCategory::Serialization,
            Self::InvalidState(_) => ErrorCategory::Other,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage_error",
            Self::NotFound(_) => "not_found",
            Self::Schema(_) => "schema_error",
            Self::Transport(_) => "transport_error",
            Self::BulkRejected { .. } => "bulk_rejected",
            Self::Config(_) => "config_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Io(_) => "io_error",
            Self::Http(_) => "http_error",
            Self::InvalidState(_) => "invalid_state",
        }
    }
}

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;
