//! Error taxonomy for the sync engine.
//!
//! Each variant carries enough context (form id, record id, field, column) to
//! diagnose a failure without re-running the job. How far a failure escalates
//! is decided by the orchestrator, not here: authentication failures abort the
//! run, transport and API failures are isolated to the call site, mapping and
//! write failures are isolated to a single record.

use thiserror::Error;

/// Errors produced by the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Authentication against the forms API failed. Fatal for the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connectivity or timeout failure talking to the forms API.
    /// Retryable on the next scheduled run; no partial commit has occurred.
    #[error("transport error calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Structured error reported by the remote service in a 2xx response
    /// (non-"ok" status or non-empty message). Terminal for that call.
    #[error("API error{}: {message}", api_code_suffix(.code))]
    Api {
        code: Option<String>,
        message: String,
    },

    /// A mapped source field was absent from the submission. Indicates a
    /// mismatch between the mapping file and the actual form schema.
    #[error("record {record_id}: source field '{field}' is missing (wanted for column '{column}')")]
    Mapping {
        record_id: i64,
        field: String,
        column: String,
    },

    /// A single row failed to persist (constraint violation, type mismatch,
    /// connectivity). Never aborts sibling rows in the same batch.
    #[error("failed to write record {record_id} to table '{table}': {message}")]
    Write {
        record_id: i64,
        table: String,
        message: String,
    },

    /// Malformed run configuration, mapping file, or submission shape.
    #[error("configuration error: {0}")]
    Config(String),
}

fn api_code_suffix(code: &Option<String>) -> String {
    match code {
        Some(c) => format!(" (code {c})"),
        None => String::new(),
    }
}

impl SyncError {
    pub fn transport(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Transport {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
