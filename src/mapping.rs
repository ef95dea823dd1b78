//! Declarative per-form field mappings.
//!
//! A mapping file is one JSON object per form type, keyed by
//! `"columnName | typeTag"` with the source field identifier as the value:
//!
//! ```json
//! {
//!   "id | int": "id",
//!   "client_name | varchar": "nomClient",
//!   "o2_level | double": "tauxO2"
//! }
//! ```
//!
//! The composite key is parsed once at load time into explicit
//! (column, type tag) fields, so nothing downstream ever re-splits strings.
//! Loading fails if no column maps the source `id` field: the destination
//! table's unique key on the record id is what makes retried inserts safe,
//! so a mapping without it cannot be synced correctly.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::record::{RawSubmission, RecordId};

/// Destination binding kind, declared per column in the mapping file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// `int`, `integer`
    Int,
    /// `double`, `float`, `real`
    Double,
    /// `blob`
    Blob,
    /// `string`, `char`, `varchar`, `text`, `date`, and anything else
    Text,
}

impl TypeTag {
    /// Parse a declared type tag, case-insensitively. Unknown tags fall back
    /// to text, matching the destination's default binding.
    pub fn parse(tag: &str) -> TypeTag {
        match tag.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => TypeTag::Int,
            "double" | "float" | "real" => TypeTag::Double,
            "blob" => TypeTag::Blob,
            _ => TypeTag::Text,
        }
    }
}

/// One `(column, type tag) → source field` entry of a mapping.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub column: String,
    pub type_tag: TypeTag,
    pub source_field: String,
}

/// The full declarative mapping for one form type. Loaded once per form,
/// read-only during a run.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub columns: Vec<ColumnMapping>,
    /// Destination column mapped from the source `id` field; the table's
    /// unique key and the idempotency key for retried inserts.
    pub key_column: String,
}

impl FieldMapping {
    /// Build a mapping from the raw `"column | tag" → field` entries of a
    /// mapping file.
    pub fn from_entries(entries: &HashMap<String, String>) -> Result<FieldMapping> {
        let mut columns = Vec::with_capacity(entries.len());
        for (key, source_field) in entries {
            let (column, tag) = key.split_once('|').ok_or_else(|| {
                SyncError::Config(format!(
                    "mapping key '{key}' is not in 'columnName | typeTag' form"
                ))
            })?;
            let column = column.trim();
            if column.is_empty() {
                return Err(SyncError::Config(format!(
                    "mapping key '{key}' has an empty column name"
                )));
            }
            columns.push(ColumnMapping {
                column: column.to_string(),
                type_tag: TypeTag::parse(tag),
                source_field: source_field.clone(),
            });
        }
        // Deterministic statement shape regardless of JSON object order.
        columns.sort_by(|a, b| a.column.cmp(&b.column));

        let key_column = columns
            .iter()
            .find(|c| c.source_field == "id")
            .map(|c| c.column.clone())
            .ok_or_else(|| {
                SyncError::Config(
                    "mapping does not map the source 'id' field; \
                     the record id is required as the destination unique key"
                        .to_string(),
                )
            })?;

        Ok(FieldMapping {
            columns,
            key_column,
        })
    }

    /// Load the mapping file for one form type from `dir/<form_name>.json`.
    pub fn load(dir: &Path, form_name: &str) -> Result<FieldMapping> {
        let path = dir.join(format!("{form_name}.json"));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::Config(format!("cannot read mapping file {}: {e}", path.display()))
        })?;
        let entries: HashMap<String, String> = serde_json::from_str(&content).map_err(|e| {
            SyncError::Config(format!("invalid mapping file {}: {e}", path.display()))
        })?;
        FieldMapping::from_entries(&entries)
    }

    /// Apply this mapping to one raw submission, producing the flat, typed
    /// row to persist. A mapped source field that is absent from the
    /// flattened submission fails with [`SyncError::Mapping`], naming both
    /// the field and the column it was to populate.
    pub fn apply(&self, raw: &RawSubmission) -> Result<TypedRow> {
        let record_id = raw.id()?;
        let flat = raw.flatten();
        let mut columns = Vec::with_capacity(self.columns.len());
        for mapping in &self.columns {
            let value = flat.get(&mapping.source_field).ok_or_else(|| {
                SyncError::Mapping {
                    record_id: record_id.0,
                    field: mapping.source_field.clone(),
                    column: mapping.column.clone(),
                }
            })?;
            columns.push(TypedColumn {
                name: mapping.column.clone(),
                tag: mapping.type_tag,
                value: value.clone(),
            });
        }
        Ok(TypedRow {
            record_id,
            key_column: self.key_column.clone(),
            columns,
        })
    }
}

/// One destination column value with its declared binding kind.
#[derive(Debug, Clone)]
pub struct TypedColumn {
    pub name: String,
    pub tag: TypeTag,
    pub value: Value,
}

/// The flattened, column-typed representation of one submission, ready for
/// persistence. One per submission per form type.
#[derive(Debug, Clone)]
pub struct TypedRow {
    pub record_id: RecordId,
    pub key_column: String,
    pub columns: Vec<TypedColumn>,
}
