//! Schema-based metadata reader
//!
//! Each change-log key `(metadata id, field id, tuple id)` points at one stored
//! value in `meta_data`. Resolving it into a document fragment needs the
//! catalog chain field → table → template, plus the tuple → inode mapping that
//! names the target document:
//!
//! ```text
//! meta_data(id, fieldid, tupleid, data)
//!     └─ fieldid  → meta_fields(fieldid, name, tableid, searchable, type)
//!                     └─ tableid → meta_tables(tableid, name, templateid)
//!                                    └─ templateid → meta_templates(templateid, name)
//!     └─ tupleid  → meta_tuple_to_file(tupleid, inodeid)
//! ```
//!
//! Catalog levels are resolved breadth-first: one batched read per level,
//! restricted to ids missing from the worker's caches. A delete resolves the
//! same chain, without the `meta_data` read, to find the path it removes.

use crate::common::{
    coerce_value, nested_fragment, ChangeOp, CompositeKey, DedupGroup, DedupedBatch, Field,
    FieldType, IndexOperation, LogId, LruCache, MetadataCaches, MetadataStore, Result, Row,
    RowKey, Table, Template,
};
use crate::reader::{assemble_operations, finish_transaction, DocumentChange, ReaderOutput};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error};

pub const META_FIELDS: &str = "meta_fields";
pub const FIELD_COLUMNS: &[&str] = &["fieldid", "name", "tableid", "searchable", "type"];

pub const META_TABLES: &str = "meta_tables";
pub const TABLE_COLUMNS: &[&str] = &["tableid", "name", "templateid"];

pub const META_TEMPLATES: &str = "meta_templates";
pub const TEMPLATE_COLUMNS: &[&str] = &["templateid", "name"];

pub const META_TUPLE_TO_FILE: &str = "meta_tuple_to_file";
pub const TUPLE_COLUMNS: &[&str] = &["tupleid", "inodeid"];

pub const META_DATA: &str = "meta_data";
pub const DATA_COLUMNS: &[&str] = &["id", "fieldid", "tupleid", "data"];

/// Top-level key of every projected document.
pub const XATTR_FIELD_NAME: &str = "xattr";

/// A record awaiting resolution, with the log ids it confirms. `data` is
/// `None` for a delete.
#[derive(Debug, Clone)]
struct PendingRecord {
    key: CompositeKey,
    data: Option<String>,
    sequence: LogId,
    log_ids: Vec<LogId>,
}

/// Reader for template/table/field structured metadata.
#[derive(Debug)]
pub struct SchemaBasedReader {
    index_name: String,
    caches: MetadataCaches,
}

impl SchemaBasedReader {
    pub fn new(index_name: impl Into<String>, lru_capacity: usize) -> Self {
        Self {
            index_name: index_name.into(),
            caches: MetadataCaches::new(lru_capacity),
        }
    }

    pub fn caches(&self) -> &MetadataCaches {
        &self.caches
    }

    pub async fn process(
        &mut self,
        store: &mut dyn MetadataStore,
        batch: &DedupedBatch,
    ) -> Result<ReaderOutput> {
        if batch.is_empty() {
            return Ok(ReaderOutput::default());
        }

        store.begin().await?;
        let outcome = self.resolve(store, &batch.groups).await;
        let (output, retained_ids) = finish_transaction(store, outcome).await?;

        Ok(output.finish(&retained_ids))
    }

    async fn resolve(
        &mut self,
        store: &mut dyn MetadataStore,
        groups: &[DedupGroup],
    ) -> Result<(ReaderOutput, BTreeSet<LogId>)> {
        let mut output = ReaderOutput::default();
        let mut retained_ids = BTreeSet::new();

        let records = self
            .read_records(store, groups, &mut output, &mut retained_ids)
            .await?;
        if records.is_empty() {
            return Ok((output, retained_ids));
        }

        // Field level.
        let field_ids: BTreeSet<i64> = records.iter().map(|r| r.key.field_id).collect();
        let fields = resolve_level(
            &mut self.caches.fields,
            store,
            META_FIELDS,
            FIELD_COLUMNS,
            &field_ids,
            decode_field,
        )
        .await?;

        // Table level: searchable fields only.
        let table_ids: BTreeSet<i64> = fields
            .values()
            .filter(|f| f.searchable)
            .map(|f| f.table_id)
            .collect();
        let tables = resolve_level(
            &mut self.caches.tables,
            store,
            META_TABLES,
            TABLE_COLUMNS,
            &table_ids,
            decode_table,
        )
        .await?;

        // Template level.
        let template_ids: BTreeSet<i64> = tables.values().map(|t| t.template_id).collect();
        let templates = resolve_level(
            &mut self.caches.templates,
            store,
            META_TEMPLATES,
            TEMPLATE_COLUMNS,
            &template_ids,
            decode_template,
        )
        .await?;

        // Tuple → inode for records that touch a document.
        let tuple_keys: BTreeSet<RowKey> = records
            .iter()
            .filter(|r| fields.get(&r.key.field_id).is_some_and(|f| f.searchable))
            .map(|r| RowKey::single(r.key.tuple_id))
            .collect();
        let tuples = if tuple_keys.is_empty() {
            HashMap::new()
        } else {
            store
                .read_by_keys(META_TUPLE_TO_FILE, &tuple_keys, TUPLE_COLUMNS)
                .await?
        };

        let mut changes = Vec::with_capacity(records.len());

        for record in records {
            let Some(field) = fields.get(&record.key.field_id) else {
                error!("Field {} not found for {}", record.key.field_id, record.key);
                retain(&mut output, &mut retained_ids, &record);
                continue;
            };

            if !field.searchable {
                output.completed.extend(record.log_ids.iter().copied());
                continue;
            }

            let Some(table) = tables.get(&field.table_id) else {
                error!("Table {} not found for {}", field.table_id, record.key);
                retain(&mut output, &mut retained_ids, &record);
                continue;
            };

            let Some(template) = templates.get(&table.template_id) else {
                error!(
                    "Template {} not found for {}",
                    table.template_id, record.key
                );
                retain(&mut output, &mut retained_ids, &record);
                continue;
            };

            let Some(inode_id) = tuples
                .get(&RowKey::single(record.key.tuple_id))
                .and_then(|row| row.get_i64("inodeid"))
            else {
                error!("Tuple {} not found for {}", record.key.tuple_id, record.key);
                retain(&mut output, &mut retained_ids, &record);
                continue;
            };

            let path = [
                XATTR_FIELD_NAME,
                template.name.as_str(),
                table.name.as_str(),
                field.name.as_str(),
            ];
            let operation = match &record.data {
                None => IndexOperation::remove_path(self.index_name.clone(), inode_id, &path),
                Some(data) => {
                    let fragment = match coerce_value(field.field_type, data) {
                        Some(value) => nested_fragment(&path, value),
                        None => {
                            output.coercion_errors += 1;
                            nested_fragment(&path[..3], Value::Object(Default::default()))
                        }
                    };
                    IndexOperation::upsert(self.index_name.clone(), inode_id, fragment)
                }
            };
            changes.push(DocumentChange::new(
                record.sequence,
                operation,
                record.log_ids,
            ));
        }

        output.operations = assemble_operations(changes);

        debug!(
            "Schema-based reader built {} operations, retained {} records",
            output.operations.len(),
            output.retained.len()
        );

        Ok((output, retained_ids))
    }

    /// Collect the records behind each group. Deletes need no data read;
    /// `AddAll` groups expand to every value of their tuple.
    async fn read_records(
        &self,
        store: &mut dyn MetadataStore,
        groups: &[DedupGroup],
        output: &mut ReaderOutput,
        retained_ids: &mut BTreeSet<LogId>,
    ) -> Result<Vec<PendingRecord>> {
        let mut records = Vec::new();

        let point_keys: BTreeSet<RowKey> = groups
            .iter()
            .filter(|g| !g.winner.is_delete() && g.winner.op != ChangeOp::AddAll)
            .map(|g| data_key(&g.winner.key))
            .collect();
        let values = if point_keys.is_empty() {
            HashMap::new()
        } else {
            store.read_by_keys(META_DATA, &point_keys, DATA_COLUMNS).await?
        };

        for group in groups {
            let key = group.winner.key;
            let sequence = group.winner.log_id;

            if group.winner.is_delete() {
                records.push(PendingRecord {
                    key,
                    data: None,
                    sequence,
                    log_ids: group.log_ids(),
                });
                continue;
            }

            if group.winner.op == ChangeOp::AddAll {
                let rows = store
                    .read_by_index(META_DATA, "tupleid", &RowKey::single(key.tuple_id), DATA_COLUMNS)
                    .await?;
                if rows.is_empty() {
                    output.completed.extend(group.log_ids());
                }
                for row in rows {
                    let (Some(id), Some(field_id)) = (row.get_i64("id"), row.get_i64("fieldid"))
                    else {
                        continue;
                    };
                    records.push(PendingRecord {
                        key: CompositeKey::new(id, field_id, key.tuple_id),
                        data: Some(row.get_str("data").unwrap_or_default().to_string()),
                        sequence,
                        log_ids: group.log_ids(),
                    });
                }
                continue;
            }

            match values.get(&data_key(&key)) {
                Some(row) => records.push(PendingRecord {
                    key,
                    data: Some(row.get_str("data").unwrap_or_default().to_string()),
                    sequence,
                    log_ids: group.log_ids(),
                }),
                None => {
                    error!("Data for {} not found", key);
                    output.retained.push(key);
                    retained_ids.extend(group.log_ids());
                }
            }
        }

        records.sort_by_key(|r| r.key);
        Ok(records)
    }
}

fn data_key(key: &CompositeKey) -> RowKey {
    RowKey::composite([key.entity_id, key.field_id, key.tuple_id])
}

fn retain(output: &mut ReaderOutput, retained_ids: &mut BTreeSet<LogId>, record: &PendingRecord) {
    output.retained.push(record.key);
    retained_ids.extend(record.log_ids.iter().copied());
}

/// Resolve `ids` through `cache`, reading only the uncached ones in a single
/// batched call. The returned map holds every id that resolved, so later
/// evictions within the same batch cannot lose a descriptor.
async fn resolve_level<V, F>(
    cache: &mut LruCache<i64, V>,
    store: &mut dyn MetadataStore,
    table: &str,
    columns: &[&str],
    ids: &BTreeSet<i64>,
    decode: F,
) -> Result<HashMap<i64, V>>
where
    V: Clone + Send,
    F: Fn(&Row) -> Option<V>,
{
    let mut resolved = HashMap::with_capacity(ids.len());
    let mut to_read = BTreeSet::new();

    for id in ids {
        match cache.get(id) {
            Ok(value) => {
                resolved.insert(*id, value);
            }
            Err(_) => {
                to_read.insert(RowKey::single(*id));
            }
        }
    }

    if to_read.is_empty() {
        return Ok(resolved);
    }

    debug!("Reading {} uncached ids from {}", to_read.len(), table);
    let rows = store.read_by_keys(table, &to_read, columns).await?;
    for (key, row) in rows {
        let Some(id) = key.0.first().copied() else {
            continue;
        };
        match decode(&row) {
            Some(value) => {
                cache.put(id, value.clone());
                resolved.insert(id, value);
            }
            None => error!("Undecodable row {} in {}", id, table),
        }
    }

    Ok(resolved)
}

fn decode_field(row: &Row) -> Option<Field> {
    let code = row.get_i64("type")?;
    let Some(field_type) = FieldType::from_code(code) else {
        error!("Unknown field type code {}", code);
        return None;
    };
    Some(Field {
        name: row.get_str("name")?.to_string(),
        table_id: row.get_i64("tableid")?,
        searchable: row.get_bool("searchable").unwrap_or(false),
        field_type,
    })
}

fn decode_table(row: &Row) -> Option<Table> {
    Some(Table {
        name: row.get_str("name")?.to_string(),
        template_id: row.get_i64("templateid")?,
    })
}

fn decode_template(row: &Row) -> Option<Template> {
    Some(Template {
        name: row.get_str("name")?.to_string(),
    })
}
