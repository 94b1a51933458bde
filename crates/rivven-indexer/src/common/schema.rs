//! Schema descriptors and value coercion
//!
//! Descriptors are read from the storage engine's metadata catalog tables and
//! never change for the life of the process.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

/// Declared type of a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int,
    Double,
    Text,
}

impl FieldType {
    /// Decode the type code stored in the catalog. Unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Bool),
            1 => Some(Self::Int),
            2 => Some(Self::Double),
            3 => Some(Self::Text),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Bool => 0,
            Self::Int => 1,
            Self::Double => 2,
            Self::Text => 3,
        }
    }
}

/// A metadata field: a named, typed column of a metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub table_id: i64,
    /// Only searchable fields are projected into the index.
    pub searchable: bool,
    pub field_type: FieldType,
}

/// A metadata table grouping fields under a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub template_id: i64,
}

/// Top-level metadata template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
}

/// Convert a raw stored value to its typed JSON form.
///
/// Returns `None` when a numeric value does not parse; the failure is logged
/// and the caller omits the field.
pub fn coerce_value(field_type: FieldType, raw: &str) -> Option<Value> {
    match field_type {
        FieldType::Bool => Some(Value::Bool(raw == "true" || raw == "1")),
        FieldType::Int => match raw.parse::<i64>() {
            Ok(v) => Some(Value::from(v)),
            Err(e) => {
                error!("Error while casting [{}] to int: {}", raw, e);
                None
            }
        },
        FieldType::Double => {
            let parsed = raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64);
            match parsed {
                Some(n) => Some(Value::Number(n)),
                None => {
                    error!("Error while casting [{}] to double", raw);
                    None
                }
            }
        }
        FieldType::Text => Some(Value::String(raw.to_string())),
    }
}
