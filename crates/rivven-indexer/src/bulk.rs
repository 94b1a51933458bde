//! # Bulk Flush Coordinator
//!
//! Submits one cycle's operations to the search index and decides which log
//! ids may be deleted.
//!
//! ## Flush order
//!
//! Upserts and removals go out together as a single bulk request, in the
//! order the readers produced them. The index applies the items of one bulk
//! in order, so a removal and a later write of the same document land in log
//! order.
//!
//! A transport failure (connection error or non-2xx status) marks the whole
//! cycle unconfirmed: nothing is deleted and every entry is retried. Resending
//! is safe because payload encoding is deterministic.
//!
//! ## Per-item results
//!
//! When the bulk response reports `errors: true`, each item is checked on its
//! own and only the failing operations keep their log ids. A 2xx response
//! without per-item detail counts as success for every item. A removal that
//! finds no document (404) has nothing left to remove and counts as success.

use crate::common::{
    BatchResult, BulkIndexClient, BulkPayload, IndexerError, IndexerMetrics, OperationKind,
    PendingOperation,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Flushes operations through a [`BulkIndexClient`].
pub struct BulkFlushCoordinator {
    client: Arc<dyn BulkIndexClient>,
    metrics: Arc<IndexerMetrics>,
}

impl BulkFlushCoordinator {
    pub fn new(client: Arc<dyn BulkIndexClient>, metrics: Arc<IndexerMetrics>) -> Self {
        Self { client, metrics }
    }

    /// Submit `operations` and report which log ids were confirmed.
    pub async fn submit(&self, operations: &[PendingOperation]) -> BatchResult {
        let mut result = BatchResult {
            overall_ok: true,
            ..Default::default()
        };
        if operations.is_empty() {
            return result;
        }

        let Some(statuses) = self.submit_bulk(operations).await else {
            return BatchResult::all_failed(operations);
        };

        let mut items_failed = 0u64;
        for (pending, ok) in operations.iter().zip(statuses) {
            if ok {
                result.succeeded.extend(pending.log_ids.iter().copied());
            } else {
                items_failed += 1;
                result.failed.extend(pending.log_ids.iter().copied());
            }
        }
        self.metrics.record_items_failed(items_failed);

        // A log id shared with a failed operation is not confirmed.
        let failed = &result.failed;
        result.succeeded.retain(|id| !failed.contains(id));

        debug!(
            "Flushed {} operations: {} ids confirmed, {} ids failed",
            operations.len(),
            result.succeeded.len(),
            result.failed.len()
        );
        result
    }

    /// Send the bulk request. `None` means the request as a whole failed.
    async fn submit_bulk(&self, operations: &[PendingOperation]) -> Option<Vec<bool>> {
        let payload = match BulkPayload::from_operations(operations) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode bulk payload: {}", e);
                return None;
            }
        };

        match self.client.submit(&payload).await {
            Ok(response) if response.is_ok() => {
                self.metrics.record_bulk_request(true);
                let kinds: Vec<OperationKind> =
                    operations.iter().map(|p| p.operation.kind).collect();
                Some(parse_bulk_items(&response.raw_response, &kinds))
            }
            Ok(response) => {
                self.metrics.record_bulk_request(false);
                let err = IndexerError::BulkRejected {
                    status: response.http_status,
                    body: response.raw_response,
                };
                error!(
                    "Bulk request of {} items rejected [{}]: {}",
                    payload.len(),
                    err.error_code(),
                    err
                );
                None
            }
            Err(e) => {
                self.metrics.record_bulk_request(false);
                error!("Bulk request of {} items failed: {}", payload.len(), e);
                None
            }
        }
    }
}

/// Interpret a 2xx bulk response body as one success flag per submitted item.
///
/// - no `errors: true` (or a body that is not JSON): every item succeeded
/// - `errors: true` with one entry per item: an item succeeds when its status
///   is 2xx and it carries no `error`, or when it is a removal answered 404
/// - `errors: true` with a mismatched or missing `items` array: nothing can be
///   attributed, so every item is treated as failed
pub fn parse_bulk_items(body: &str, kinds: &[OperationKind]) -> Vec<bool> {
    let expected = kinds.len();
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return vec![true; expected];
    };

    if !parsed.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return vec![true; expected];
    }

    let Some(items) = parsed.get("items").and_then(Value::as_array) else {
        warn!("Bulk response reports errors without items");
        return vec![false; expected];
    };
    if items.len() != expected {
        warn!(
            "Bulk response has {} items, expected {}",
            items.len(),
            expected
        );
        return vec![false; expected];
    }

    items
        .iter()
        .zip(kinds)
        .enumerate()
        .map(|(position, (item, kind))| {
            // Each item is keyed by its action name.
            let result = item
                .as_object()
                .and_then(|obj| obj.values().next())
                .unwrap_or(item);
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
            let error = result.get("error");
            let ok = match kind {
                OperationKind::Remove if status == 404 => true,
                _ => (200..300).contains(&status) && error.is_none(),
            };
            if !ok {
                let reason = error.map(Value::to_string).unwrap_or_default();
                warn!(
                    "Bulk item {} failed with status {}: {}",
                    position, status, reason
                );
            }
            ok
        })
        .collect()
}
