//! # Index Operations
//!
//! Write operations against the search index and their bulk encoding.
//!
//! An [`IndexOperation`] is produced by a reader worker and handed to the
//! flush coordinator together with the log ids it covers
//! ([`PendingOperation`]). Every operation is a bulk `update` of one target
//! document, encoded as a newline-delimited action/document pair. Upserts
//! carry a partial document:
//!
//! ```text
//! {"update":{"_id":55,"_index":"projects"}}
//! {"doc":{"xattr":{"meta":{"t1":{"status":"ok"}}}},"doc_as_upsert":true}
//! ```
//!
//! Removals carry a painless script that drops one path from the document:
//!
//! ```text
//! {"update":{"_id":55,"_index":"projects"}}
//! {"script":{"lang":"painless","params":{"path":["xattr","meta","t1","status"]},"source":"..."}}
//! ```
//!
//! Because both kinds travel in the same bulk request, the index applies them
//! in payload order. Objects are serialized with sorted keys, so the same
//! operation always encodes to the same bytes.

use crate::common::{LogId, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Removes `params.path` from the document; a no-op when the path is absent.
pub const REMOVE_PATH_SCRIPT: &str = "def node = ctx._source; \
int last = params.path.size() - 1; \
for (int i = 0; i < last && node instanceof Map; i++) { node = node.get(params.path.get(i)); } \
if (node instanceof Map && node.containsKey(params.path.get(last))) { node.remove(params.path.get(last)); } \
else { ctx.op = 'noop'; }";

/// Kind of index write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Partial-document update with `doc_as_upsert`
    Upsert,
    /// Scripted update removing part of an existing document
    Remove,
}

/// One write against the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
    pub index: String,
    /// Target document id
    pub target_id: i64,
    pub kind: OperationKind,
    /// Partial document for upserts, script object for removals
    pub fragment: Value,
}

impl IndexOperation {
    pub fn upsert(index: impl Into<String>, target_id: i64, fragment: Value) -> Self {
        Self {
            index: index.into(),
            target_id,
            kind: OperationKind::Upsert,
            fragment,
        }
    }

    /// Scripted removal running `source` with `params`.
    pub fn remove(index: impl Into<String>, target_id: i64, source: &str, params: Value) -> Self {
        Self {
            index: index.into(),
            target_id,
            kind: OperationKind::Remove,
            fragment: json!({ "source": source, "lang": "painless", "params": params }),
        }
    }

    /// Removal of the value at `path` in the target document.
    pub fn remove_path(index: impl Into<String>, target_id: i64, path: &[&str]) -> Self {
        Self::remove(index, target_id, REMOVE_PATH_SCRIPT, json!({ "path": path }))
    }

    #[inline]
    pub fn is_upsert(&self) -> bool {
        self.kind == OperationKind::Upsert
    }

    /// Bulk action line.
    pub fn action_line(&self) -> Value {
        json!({ "update": { "_index": self.index, "_id": self.target_id } })
    }

    /// Bulk document line.
    pub fn document_line(&self) -> Value {
        match self.kind {
            OperationKind::Upsert => json!({ "doc": self.fragment, "doc_as_upsert": true }),
            OperationKind::Remove => json!({ "script": self.fragment }),
        }
    }
}

/// An operation plus every log id that becomes deletable when it succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub operation: IndexOperation,
    pub log_ids: BTreeSet<LogId>,
}

impl PendingOperation {
    pub fn new(operation: IndexOperation, log_ids: impl IntoIterator<Item = LogId>) -> Self {
        Self {
            operation,
            log_ids: log_ids.into_iter().collect(),
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Log ids whose operations were confirmed
    pub succeeded: BTreeSet<LogId>,
    /// Log ids whose operations failed or were not attempted
    pub failed: BTreeSet<LogId>,
    /// False when the cycle failed at the transport level
    pub overall_ok: bool,
}

impl BatchResult {
    /// Every operation failed; nothing may be deleted.
    pub fn all_failed(operations: &[PendingOperation]) -> Self {
        Self {
            succeeded: BTreeSet::new(),
            failed: operations
                .iter()
                .flat_map(|op| op.log_ids.iter().copied())
                .collect(),
            overall_ok: false,
        }
    }
}

/// Bulk request body for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkPayload {
    lines: Vec<(String, String)>,
}

impl BulkPayload {
    /// Encode `operations` in order.
    pub fn from_operations(operations: &[PendingOperation]) -> Result<Self> {
        let mut lines = Vec::with_capacity(operations.len());
        for pending in operations {
            lines.push((
                serde_json::to_string(&pending.operation.action_line())?,
                serde_json::to_string(&pending.operation.document_line())?,
            ));
        }
        Ok(Self { lines })
    }

    /// Newline-delimited body, terminated by a trailing newline.
    pub fn to_ndjson(&self) -> String {
        let mut out = String::new();
        for (action, doc) in &self.lines {
            out.push_str(action);
            out.push('\n');
            out.push_str(doc);
            out.push('\n');
        }
        out
    }

    /// Number of action/document pairs.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Deep-merge `source` into `target`. Objects merge key by key; anything else
/// in `source` overwrites.
pub fn merge_fragment(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_fragment(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Build a nested object from a path of keys ending in `leaf`.
pub fn nested_fragment(path: &[&str], leaf: Value) -> Value {
    path.iter().rev().fold(leaf, |acc, key| {
        let mut map = Map::new();
        map.insert((*key).to_string(), acc);
        Value::Object(map)
    })
}
