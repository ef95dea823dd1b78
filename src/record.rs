//! Raw submission records as delivered by the forms API.
//!
//! A submission is a flat `id → value` mapping at the top level, except that
//! the API encodes repeated/optional fields as a nested group: an object whose
//! entries are themselves objects carrying a `"value"` key. The rest of the
//! pipeline only ever sees the flattened shape produced by
//! [`RawSubmission::flatten`], so shape ambiguity stops at this boundary.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// Source-assigned identifier of one submission.
///
/// The API returns ids as strings or bare ints depending on the endpoint, but
/// acknowledgment bodies require ints, so we normalize on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl RecordId {
    /// Parse a record id out of a JSON value (string or integer).
    pub fn from_value(value: &Value) -> Result<RecordId> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(RecordId)
                .ok_or_else(|| SyncError::Config(format!("record id {n} is not an integer"))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(RecordId)
                .map_err(|_| SyncError::Config(format!("invalid record id value: '{s}'"))),
            other => Err(SyncError::Config(format!(
                "record id has unexpected shape: {other}"
            ))),
        }
    }
}

/// One unread submission, in its native nested shape. Never mutated.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RawSubmission {
    pub fields: Map<String, Value>,
}

impl RawSubmission {
    /// The source-assigned record id, from the submission's `id` field.
    pub fn id(&self) -> Result<RecordId> {
        let value = self
            .fields
            .get("id")
            .ok_or_else(|| SyncError::Config("submission has no 'id' field".to_string()))?;
        RecordId::from_value(value)
    }

    /// Flatten the submission into a single-level `field → scalar` mapping.
    ///
    /// Group fields are replaced by their entries' `"value"` payloads and
    /// merged over the top-level fields; on a key collision the group entry
    /// wins, since the group carries the dynamic part of the form schema.
    pub fn flatten(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        let mut groups = Vec::new();
        for (key, value) in &self.fields {
            if is_field_group(value) {
                groups.push(value);
            } else {
                flat.insert(key.clone(), value.clone());
            }
        }
        for group in groups {
            let Value::Object(entries) = group else {
                unreachable!("is_field_group only accepts objects");
            };
            for (field_id, entry) in entries {
                let payload = entry
                    .get("value")
                    .cloned()
                    .unwrap_or(Value::Null);
                flat.insert(field_id.clone(), payload);
            }
        }
        flat
    }
}

/// A field group is a non-empty object whose entries are all objects carrying
/// a `"value"` key. Anything else is treated as a plain scalar field.
fn is_field_group(value: &Value) -> bool {
    match value {
        Value::Object(entries) if !entries.is_empty() => entries
            .values()
            .all(|entry| matches!(entry, Value::Object(inner) if inner.contains_key("value"))),
        _ => false,
    }
}
