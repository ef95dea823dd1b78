//! In-memory test doubles for the sync pipeline.
//!
//! [`MockFormsApi`] models the remote service including its read/unread
//! acknowledgment state and supports failure injection per operation, so
//! tests can exercise crash-and-retry sequences without a live API.
//! [`MemoryRowWriter`] models the destination table with a unique key on the
//! record id: a duplicate insert is absorbed without creating a second row,
//! exactly like the production `ON DUPLICATE KEY UPDATE` statement.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::client::{FormSummary, FormsSource};
use crate::error::{Result, SyncError};
use crate::mapping::TypedRow;
use crate::record::{RawSubmission, RecordId};
use crate::writer::{bind_value, RowWriter};

struct MockSubmission {
    id: i64,
    value: Value,
    read: bool,
}

/// In-memory stand-in for the forms API.
#[derive(Default)]
pub struct MockFormsApi {
    forms: HashMap<String, Vec<MockSubmission>>,
    form_names: HashMap<String, String>,
    authenticated: bool,
    /// Every trait call in order, for asserting call sequences.
    pub calls: Vec<String>,
    /// Fail the next authenticate call.
    pub fail_auth: bool,
    /// Form ids whose fetch fails with a transport error.
    pub fail_fetch: HashSet<String>,
    /// Fail this many upcoming mark_read calls, then succeed.
    pub fail_mark_read: usize,
}

impl MockFormsApi {
    pub fn new() -> Self {
        MockFormsApi::default()
    }

    /// Register a form model (used by `list_forms`).
    pub fn add_form(&mut self, form_id: &str, name: &str) {
        self.form_names
            .insert(form_id.to_string(), name.to_string());
        self.forms.entry(form_id.to_string()).or_default();
    }

    /// Add an unread submission. The value must carry an `id` field parseable
    /// as an integer, like real submissions do.
    pub fn add_submission(&mut self, form_id: &str, value: Value) {
        let raw: RawSubmission =
            serde_json::from_value(value.clone()).expect("submission must be a JSON object");
        let id = raw.id().expect("mock submission needs a parseable id").0;
        self.forms
            .entry(form_id.to_string())
            .or_default()
            .push(MockSubmission {
                id,
                value,
                read: false,
            });
    }

    /// Whether the given record has been acknowledged as read.
    pub fn is_read(&self, form_id: &str, id: i64) -> bool {
        self.forms
            .get(form_id)
            .map(|subs| subs.iter().any(|s| s.id == id && s.read))
            .unwrap_or(false)
    }

    pub fn unread_count(&self, form_id: &str) -> usize {
        self.forms
            .get(form_id)
            .map(|subs| subs.iter().filter(|s| !s.read).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FormsSource for MockFormsApi {
    async fn authenticate(&mut self) -> Result<()> {
        self.calls.push("authenticate".to_string());
        if self.fail_auth {
            return Err(SyncError::Auth("invalid credentials".to_string()));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn fetch_unread(&mut self, form_id: &str) -> Result<Vec<RawSubmission>> {
        self.calls.push(format!("fetch_unread:{form_id}"));
        assert!(self.authenticated, "fetch before authenticate");
        if self.fail_fetch.contains(form_id) {
            return Err(SyncError::transport(
                format!("forms/{form_id}/data/readnew"),
                "connection timed out",
            ));
        }
        let submissions = self
            .forms
            .get(form_id)
            .map(|subs| {
                subs.iter()
                    .filter(|s| !s.read)
                    .map(|s| serde_json::from_value(s.value.clone()).unwrap())
                    .collect()
            })
            .unwrap_or_default();
        Ok(submissions)
    }

    async fn mark_read(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()> {
        self.calls.push(format!("mark_read:{form_id}"));
        assert!(self.authenticated, "mark_read before authenticate");
        if self.fail_mark_read > 0 {
            self.fail_mark_read -= 1;
            return Err(SyncError::transport(
                format!("forms/{form_id}/markasread"),
                "connection reset",
            ));
        }
        let wanted: HashSet<i64> = ids.iter().map(|id| id.0).collect();
        if let Some(subs) = self.forms.get_mut(form_id) {
            for sub in subs.iter_mut() {
                if wanted.contains(&sub.id) {
                    sub.read = true;
                }
            }
        }
        Ok(())
    }

    async fn mark_unread(&mut self, form_id: &str, ids: &[RecordId]) -> Result<()> {
        self.calls.push(format!("mark_unread:{form_id}"));
        let wanted: HashSet<i64> = ids.iter().map(|id| id.0).collect();
        if let Some(subs) = self.forms.get_mut(form_id) {
            for sub in subs.iter_mut() {
                if wanted.contains(&sub.id) {
                    sub.read = false;
                }
            }
        }
        Ok(())
    }

    async fn list_forms(&mut self) -> Result<Vec<FormSummary>> {
        self.calls.push("list_forms".to_string());
        let mut forms: Vec<FormSummary> = self
            .form_names
            .iter()
            .map(|(id, name)| FormSummary {
                id: id.clone(),
                name: name.clone(),
            })
            .collect();
        forms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(forms)
    }
}

type StoredRow = BTreeMap<String, mysql_async::Value>;

/// In-memory stand-in for the MySQL destination with a unique key on the
/// record id per table.
#[derive(Default)]
pub struct MemoryRowWriter {
    tables: HashMap<String, BTreeMap<i64, StoredRow>>,
    /// Record ids whose write fails (simulated constraint/type violation).
    pub fail_ids: HashSet<i64>,
    /// Total write attempts, duplicates included.
    pub attempts: usize,
}

impl MemoryRowWriter {
    pub fn new() -> Self {
        MemoryRowWriter::default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn get_row(&self, table: &str, id: i64) -> Option<&StoredRow> {
        self.tables.get(table).and_then(|rows| rows.get(&id))
    }
}

#[async_trait]
impl RowWriter for MemoryRowWriter {
    async fn write(&mut self, table: &str, row: &TypedRow) -> Result<RecordId> {
        self.attempts += 1;
        if self.fail_ids.contains(&row.record_id.0) {
            return Err(SyncError::Write {
                record_id: row.record_id.0,
                table: table.to_string(),
                message: "simulated write failure".to_string(),
            });
        }
        let mut stored = StoredRow::new();
        for column in &row.columns {
            let bound = bind_value(column.tag, &column.value).map_err(|e| SyncError::Write {
                record_id: row.record_id.0,
                table: table.to_string(),
                message: format!("column '{}': {e}", column.name),
            })?;
            stored.insert(column.name.clone(), bound);
        }
        // Unique key on the record id: a re-insert is a no-op, not a
        // second row.
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(row.record_id.0)
            .or_insert(stored);
        Ok(row.record_id)
    }
}
