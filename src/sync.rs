//! Sync orchestration: pull → transform → persist → acknowledge.
//!
//! The two systems share no transaction, so acknowledgment is the single
//! commit point and every step before it must be retry-safe:
//!
//! 1. Authenticate once per run. Failure aborts before any other call.
//! 2. Per form template, fetch the unread submissions. A fetch failure
//!    (transport or API) skips that template only.
//! 3. Per submission, map and persist. A mapping or write failure isolates
//!    that record: it is neither persisted nor acknowledged, stays unread at
//!    the source, and is re-fetched on the next run.
//! 4. After the whole batch, acknowledge exactly the ids that were durably
//!    written. If the acknowledgment call fails, the rows are already
//!    idempotent on re-insert (destination unique key on the record id), so
//!    the next run re-fetches, no-ops the insert, and acknowledges again.
//!
//! Acknowledgment never precedes persistence, and a record whose persistence
//! outcome is unknown is treated as failed and left unread.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::client::FormsSource;
use crate::config::FormTemplate;
use crate::error::Result;
use crate::mapping::FieldMapping;
use crate::record::RecordId;
use crate::writer::RowWriter;

/// One record that failed to map or persist and therefore stays unread.
#[derive(Debug, Clone)]
pub struct RecordFailure {
    /// None when the submission's id itself could not be parsed.
    pub record_id: Option<RecordId>,
    pub error: String,
}

/// Outcome of processing one form template.
#[derive(Debug, Clone, Default)]
pub struct FormReport {
    pub form_name: String,
    pub form_id: String,
    /// Template-scoped failure (mapping file, fetch) that skipped the whole
    /// template. Record-scoped failures go to `failures` instead.
    pub skipped: Option<String>,
    pub fetched: usize,
    pub persisted: usize,
    pub acknowledged: usize,
    /// Set when rows were persisted but the acknowledgment call failed; the
    /// records stay unread and the next run absorbs the re-insert.
    pub ack_error: Option<String>,
    pub failures: Vec<RecordFailure>,
}

/// Outcome of one complete run across all form templates.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub forms: Vec<FormReport>,
}

impl RunReport {
    pub fn total_persisted(&self) -> usize {
        self.forms.iter().map(|f| f.persisted).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.forms.iter().map(|f| f.failures.len()).sum()
    }
}

/// Drives one batch run. Single-threaded, run-to-completion: a sequential
/// loop over form templates, each a sequential loop over its submissions.
pub struct SyncOrchestrator<S, W> {
    source: S,
    writer: W,
    mapping_dir: PathBuf,
    dry_run: bool,
}

impl<S: FormsSource, W: RowWriter> SyncOrchestrator<S, W> {
    pub fn new(source: S, writer: W, mapping_dir: PathBuf, dry_run: bool) -> Self {
        SyncOrchestrator {
            source,
            writer,
            mapping_dir,
            dry_run,
        }
    }

    /// Run the full sync cycle over the given templates.
    ///
    /// Only an authentication failure is fatal here; everything below it is
    /// isolated to a template or a record and lands in the [`RunReport`].
    pub async fn run(&mut self, templates: &[FormTemplate]) -> Result<RunReport> {
        let started_at = Utc::now();
        self.source.authenticate().await?;

        let mut forms = Vec::with_capacity(templates.len());
        for template in templates {
            forms.push(self.sync_form(template).await);
        }

        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            forms,
        })
    }

    async fn sync_form(&mut self, template: &FormTemplate) -> FormReport {
        let mut report = FormReport {
            form_name: template.name.clone(),
            form_id: template.form_id.clone(),
            ..FormReport::default()
        };

        let mapping = match FieldMapping::load(&self.mapping_dir, &template.name) {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!(
                    "Skipping form '{}' ({}): {e}",
                    template.name, template.form_id
                );
                report.skipped = Some(e.to_string());
                return report;
            }
        };

        let submissions = match self.source.fetch_unread(&template.form_id).await {
            Ok(submissions) => submissions,
            Err(e) => {
                warn!(
                    "Skipping form '{}' ({}): fetch failed: {e}",
                    template.name, template.form_id
                );
                report.skipped = Some(e.to_string());
                return report;
            }
        };
        report.fetched = submissions.len();
        info!(
            "Fetched {} unread submissions for form '{}' ({})",
            submissions.len(),
            template.name,
            template.form_id
        );

        let mut ack_ids: Vec<RecordId> = Vec::new();
        for raw in &submissions {
            let row = match mapping.apply(raw) {
                Ok(row) => row,
                Err(e) => {
                    warn!("Form '{}': {e}", template.name);
                    report.failures.push(RecordFailure {
                        record_id: raw.id().ok(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if self.dry_run {
                debug!(
                    "Dry run: would write record {} to table '{}'",
                    row.record_id,
                    template.table_name()
                );
                continue;
            }

            match self.writer.write(template.table_name(), &row).await {
                Ok(id) => {
                    debug!(
                        "Persisted record {id} into table '{}'",
                        template.table_name()
                    );
                    report.persisted += 1;
                    ack_ids.push(id);
                }
                Err(e) => {
                    warn!("Form '{}': {e}", template.name);
                    report.failures.push(RecordFailure {
                        record_id: Some(row.record_id),
                        error: e.to_string(),
                    });
                }
            }
        }

        // The single commit point: acknowledge exactly what was persisted.
        if !ack_ids.is_empty() {
            match self.source.mark_read(&template.form_id, &ack_ids).await {
                Ok(()) => {
                    report.acknowledged = ack_ids.len();
                    info!(
                        "Acknowledged {} records for form '{}'",
                        ack_ids.len(),
                        template.name
                    );
                }
                Err(e) => {
                    // Rows are already durable; the records stay unread and
                    // the next run's re-insert is a no-op on the unique key.
                    warn!(
                        "Form '{}': persisted {} records but acknowledgment failed, \
                         they will be re-fetched and absorbed next run: {e}",
                        template.name,
                        ack_ids.len()
                    );
                    report.ack_error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Consume the orchestrator, handing back its collaborators.
    pub fn into_parts(self) -> (S, W) {
        (self.source, self.writer)
    }
}
