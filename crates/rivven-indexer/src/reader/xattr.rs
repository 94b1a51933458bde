//! Extended-attribute reader
//!
//! Change-log keys are `(inode id, namespace, attribute id)`. Each attribute
//! is projected as `doc.xattr.<name>`; values that parse as JSON are embedded
//! as JSON, anything else as a string. The document also records which
//! attribute wrote which name under `doc.xattr_keys.<namespace>-<attr id>`,
//! since a removed attribute's name can no longer be read from storage.

use crate::common::{
    nested_fragment, ChangeOp, CompositeKey, DedupGroup, DedupedBatch, IndexOperation,
    MetadataStore, Result, Row, RowKey,
};
use crate::reader::{assemble_operations, finish_transaction, DocumentChange, ReaderOutput};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error};

pub const XATTR_TABLE: &str = "xattrs";
pub const XATTR_COLUMNS: &[&str] = &["inode_id", "namespace", "attr_id", "name", "value"];

/// Document field mapping attribute keys to the names they were written as.
pub const XATTR_KEYS_FIELD: &str = "xattr_keys";

/// Removes the attribute recorded under `params.key`. The value is kept while
/// another attribute still maps to the same name.
pub const REMOVE_XATTR_SCRIPT: &str = "def keys = ctx._source.xattr_keys; \
if (keys instanceof Map && keys.containsKey(params.key)) { \
def name = keys.remove(params.key); \
if (!keys.containsValue(name) && ctx._source.xattr instanceof Map) { ctx._source.xattr.remove(name); } } \
else { ctx.op = 'noop'; }";

/// Reader for generic extended attributes.
#[derive(Debug)]
pub struct XAttrReader {
    index_name: String,
}

impl XAttrReader {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }

    pub async fn process(
        &mut self,
        store: &mut dyn MetadataStore,
        batch: &DedupedBatch,
    ) -> Result<ReaderOutput> {
        let (deletes, writes): (Vec<&DedupGroup>, Vec<&DedupGroup>) =
            batch.groups.iter().partition(|g| g.winner.is_delete());

        let mut output = ReaderOutput::default();
        let mut changes: Vec<DocumentChange> = deletes
            .iter()
            .map(|group| {
                let key = group.winner.key;
                DocumentChange::new(
                    group.winner.log_id,
                    IndexOperation::remove(
                        self.index_name.clone(),
                        key.entity_id,
                        REMOVE_XATTR_SCRIPT,
                        json!({ "key": attribute_key(key.field_id, key.tuple_id) }),
                    ),
                    group.log_ids(),
                )
            })
            .collect();

        let mut retained_ids = BTreeSet::new();
        if !writes.is_empty() {
            store.begin().await?;
            let outcome = read_attributes(store, &writes).await;
            let resolved = finish_transaction(store, outcome).await?;

            for (group, rows) in writes.iter().zip(resolved) {
                let key = group.winner.key;
                match rows {
                    None => {
                        error!("XAttr {} not found", key);
                        output.retained.push(key);
                        retained_ids.extend(group.log_ids());
                    }
                    Some(rows) if rows.is_empty() => {
                        output.completed.extend(group.log_ids());
                    }
                    Some(rows) => {
                        for row in rows {
                            if let Some(fragment) = attribute_fragment(&row) {
                                changes.push(DocumentChange::new(
                                    group.winner.log_id,
                                    IndexOperation::upsert(
                                        self.index_name.clone(),
                                        key.entity_id,
                                        fragment,
                                    ),
                                    group.log_ids(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        output.operations = assemble_operations(changes);

        debug!(
            "XAttr reader built {} operations, retained {} records",
            output.operations.len(),
            output.retained.len()
        );

        Ok(output.finish(&retained_ids))
    }
}

/// `<namespace>-<attr id>`, the key an attribute is recorded under.
pub fn attribute_key(namespace: i64, attr_id: i64) -> String {
    format!("{}-{}", namespace, attr_id)
}

fn xattr_key(key: &CompositeKey) -> RowKey {
    RowKey::composite([key.entity_id, key.field_id, key.tuple_id])
}

/// Rows per write group, in group order. `None` marks a point lookup that
/// found no row.
async fn read_attributes(
    store: &mut dyn MetadataStore,
    writes: &[&DedupGroup],
) -> Result<Vec<Option<Vec<Row>>>> {
    let point_keys: BTreeSet<RowKey> = writes
        .iter()
        .filter(|g| g.winner.op != ChangeOp::AddAll)
        .map(|g| xattr_key(&g.winner.key))
        .collect();
    let mut found: HashMap<RowKey, Row> = if point_keys.is_empty() {
        HashMap::new()
    } else {
        store
            .read_by_keys(XATTR_TABLE, &point_keys, XATTR_COLUMNS)
            .await?
    };

    let mut out = Vec::with_capacity(writes.len());
    for group in writes {
        let key = group.winner.key;
        if group.winner.op == ChangeOp::AddAll {
            let rows = store
                .read_by_index(
                    XATTR_TABLE,
                    "inode_id",
                    &RowKey::single(key.entity_id),
                    XATTR_COLUMNS,
                )
                .await?;
            out.push(Some(rows));
        } else {
            out.push(found.remove(&xattr_key(&key)).map(|row| vec![row]));
        }
    }
    Ok(out)
}

fn attribute_fragment(row: &Row) -> Option<Value> {
    let name = row.get_str("name")?;
    let raw = row.get_str("value").unwrap_or_default();
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    let mut doc = nested_fragment(&["xattr", name], value);
    if let (Some(namespace), Some(attr_id), Value::Object(map)) =
        (row.get_i64("namespace"), row.get_i64("attr_id"), &mut doc)
    {
        let mut keys = Map::new();
        keys.insert(attribute_key(namespace, attr_id), Value::String(name.to_string()));
        map.insert(XATTR_KEYS_FIELD.to_string(), Value::Object(keys));
    }
    Some(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{dedup_batch, ChangeLogEntry, LogId, OperationKind};
    use crate::testing::MemoryMetadataStore;

    fn entry(log_id: LogId, key: (i64, i64, i64), op: ChangeOp) -> ChangeLogEntry {
        ChangeLogEntry::new(log_id, CompositeKey::new(key.0, key.1, key.2), op)
    }

    #[tokio::test]
    async fn test_attributes_merge_per_inode() {
        let store = MemoryMetadataStore::new();
        store.add_xattr(55, 1, 1, "owner", "alice");
        store.add_xattr(55, 1, 2, "labels", r#"{"env":"prod"}"#);
        let mut reader = XAttrReader::new("files");
        let mut handle = store.clone();

        let output = reader
            .process(
                &mut handle,
                &dedup_batch(vec![
                    entry(1, (55, 1, 1), ChangeOp::Add),
                    entry(2, (55, 1, 2), ChangeOp::Update),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(output.operations.len(), 1);
        assert_eq!(output.operations[0].operation.target_id, 55);
        assert_eq!(
            output.operations[0].operation.fragment,
            json!({
                "xattr": {"owner": "alice", "labels": {"env": "prod"}},
                "xattr_keys": {"1-1": "owner", "1-2": "labels"}
            })
        );
        assert_eq!(output.operations[0].log_ids, BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_add_all_reads_by_inode() {
        let store = MemoryMetadataStore::new();
        store.add_xattr(7, 1, 1, "a", "1");
        store.add_xattr(7, 1, 2, "b", "two");
        store.add_xattr(8, 1, 1, "c", "x");
        let mut reader = XAttrReader::new("files");
        let mut handle = store.clone();

        let output = reader
            .process(
                &mut handle,
                &dedup_batch(vec![entry(3, (7, 0, 0), ChangeOp::AddAll)]),
            )
            .await
            .unwrap();

        assert_eq!(output.operations.len(), 1);
        assert_eq!(
            output.operations[0].operation.fragment["xattr"],
            json!({"a": 1, "b": "two"})
        );
        assert_eq!(store.read_calls(XATTR_TABLE), 1);
    }

    #[tokio::test]
    async fn test_missing_attribute_is_retained() {
        let store = MemoryMetadataStore::new();
        let mut reader = XAttrReader::new("files");
        let mut handle = store.clone();

        let output = reader
            .process(
                &mut handle,
                &dedup_batch(vec![entry(4, (9, 1, 1), ChangeOp::Add)]),
            )
            .await
            .unwrap();

        assert!(output.operations.is_empty());
        assert_eq!(output.retained, vec![CompositeKey::new(9, 1, 1)]);
        assert!(output.completed.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_attribute() {
        let store = MemoryMetadataStore::new();
        let mut reader = XAttrReader::new("files");
        let mut handle = store.clone();

        let output = reader
            .process(
                &mut handle,
                &dedup_batch(vec![entry(4, (9, 1, 3), ChangeOp::Delete)]),
            )
            .await
            .unwrap();

        assert_eq!(output.operations.len(), 1);
        let op = &output.operations[0].operation;
        assert_eq!(op.kind, OperationKind::Remove);
        assert_eq!(op.target_id, 9);
        assert_eq!(op.fragment["source"], REMOVE_XATTR_SCRIPT);
        assert_eq!(op.fragment["params"], json!({"key": "1-3"}));
        assert_eq!(output.operations[0].log_ids, BTreeSet::from([4]));
        assert_eq!(store.total_read_calls(), 0);
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_add_on_same_inode_stay_in_log_order() {
        let store = MemoryMetadataStore::new();
        store.add_xattr(5, 1, 2, "b", "v");
        let mut reader = XAttrReader::new("files");
        let mut handle = store.clone();

        let output = reader
            .process(
                &mut handle,
                &dedup_batch(vec![
                    entry(1, (5, 1, 1), ChangeOp::Delete),
                    entry(2, (5, 1, 2), ChangeOp::Add),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(output.operations.len(), 2);
        assert_eq!(output.operations[0].operation.kind, OperationKind::Remove);
        assert_eq!(output.operations[0].log_ids, BTreeSet::from([1]));
        assert_eq!(output.operations[1].operation.kind, OperationKind::Upsert);
        assert_eq!(output.operations[1].operation.fragment["xattr"], json!({"b": "v"}));
        assert!(output
            .operations
            .iter()
            .all(|p| p.operation.target_id == 5));
    }
}
