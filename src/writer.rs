//! Destination row writer.
//!
//! One parameterized INSERT per row; values are bound, never interpolated
//! into statement text. The binding kind is selected from the column's
//! declared type tag, not from the JSON shape of the source value, so a
//! submission delivering `"3"` for a `double` column still binds 3.0.
//!
//! The destination table's unique key is the source record id. A retried
//! insert after a crash between persistence and acknowledgment must be a
//! no-op rather than a second row, so the statement carries an
//! `ON DUPLICATE KEY UPDATE key = key` clause and a duplicate is reported
//! as success.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::Pool;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::mapping::{TypeTag, TypedRow};
use crate::record::RecordId;

/// Contract for persisting one typed row. A failure is scoped to that row
/// and must never abort sibling rows of the same batch.
#[async_trait]
pub trait RowWriter: Send {
    async fn write(&mut self, table: &str, row: &TypedRow) -> Result<RecordId>;
}

/// Convert one column value to its destination binding according to the
/// declared type tag. JSON null binds as SQL NULL for every tag.
pub fn bind_value(tag: TypeTag, value: &Value) -> std::result::Result<mysql_async::Value, String> {
    if value.is_null() {
        return Ok(mysql_async::Value::NULL);
    }
    match tag {
        TypeTag::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(mysql_async::Value::Int)
                .ok_or_else(|| format!("{n} is not an integer")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(mysql_async::Value::Int)
                .map_err(|_| format!("'{s}' is not an integer")),
            Value::Bool(b) => Ok(mysql_async::Value::Int(i64::from(*b))),
            other => Err(format!("cannot bind {other} as integer")),
        },
        TypeTag::Double => match value {
            Value::Number(n) => n
                .as_f64()
                .map(mysql_async::Value::Double)
                .ok_or_else(|| format!("{n} is not representable as a double")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(mysql_async::Value::Double)
                .map_err(|_| format!("'{s}' is not a double")),
            other => Err(format!("cannot bind {other} as double")),
        },
        TypeTag::Blob => match value {
            Value::String(s) => Ok(mysql_async::Value::Bytes(s.clone().into_bytes())),
            other => Err(format!("cannot bind {other} as blob")),
        },
        TypeTag::Text => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                // Compound values land in the flat column as JSON text.
                other => other.to_string(),
            };
            Ok(mysql_async::Value::Bytes(text.into_bytes()))
        }
    }
}

/// Backtick-quote an identifier, rejecting names that cannot be quoted.
/// Identifiers come from operator-controlled config, never from submissions,
/// but the statement text must still stay well-formed.
fn quote_ident(name: &str) -> std::result::Result<String, String> {
    if name.is_empty() || name.contains('`') {
        return Err(format!("invalid identifier '{name}'"));
    }
    Ok(format!("`{name}`"))
}

/// Build the INSERT statement and its positional bindings for one row.
pub fn build_insert(
    table: &str,
    row: &TypedRow,
) -> std::result::Result<(String, Vec<mysql_async::Value>), String> {
    if row.columns.is_empty() {
        return Err("row has no columns".to_string());
    }
    let mut columns = Vec::with_capacity(row.columns.len());
    let mut params = Vec::with_capacity(row.columns.len());
    for column in &row.columns {
        columns.push(quote_ident(&column.name)?);
        params.push(
            bind_value(column.tag, &column.value)
                .map_err(|e| format!("column '{}': {e}", column.name))?,
        );
    }
    let key = quote_ident(&row.key_column)?;
    let placeholders = vec!["?"; params.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {key} = {key}",
        quote_ident(table)?,
        columns.join(", "),
        placeholders,
    );
    Ok((sql, params))
}

/// MySQL implementation of [`RowWriter`] over a shared connection pool.
pub struct MysqlRowWriter {
    pool: Pool,
}

impl MysqlRowWriter {
    pub fn new(pool: Pool) -> Self {
        MysqlRowWriter { pool }
    }
}

#[async_trait]
impl RowWriter for MysqlRowWriter {
    async fn write(&mut self, table: &str, row: &TypedRow) -> Result<RecordId> {
        let write_error = |message: String| SyncError::Write {
            record_id: row.record_id.0,
            table: table.to_string(),
            message,
        };

        let (sql, params) = build_insert(table, row).map_err(write_error)?;
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| write_error(format!("cannot get destination connection: {e}")))?;
        conn.exec_drop(sql, params)
            .await
            .map_err(|e| write_error(e.to_string()))?;
        Ok(row.record_id)
    }
}
