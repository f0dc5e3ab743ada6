//! Bulk mutation executor.
//!
//! Turns a homogeneous list of rows into a single statement by expanding a
//! `{values}` placeholder into `(?, ?), (?, ?), ...`. Statements combine it
//! with a CTE for updates and deletes:
//!
//! ```sql
//! WITH r(id, language) AS (VALUES {values})
//! UPDATE contacts SET language = r.language FROM r WHERE contacts.id = r.id
//! ```
//!
//! or with a plain `INSERT ... VALUES {values}`. The statement runs on the
//! caller's connection or transaction; nothing is committed here.

use rusqlite::Connection;
use rusqlite::types::Value;

use switchyard_core::{Result, SwitchyardError};

/// SQLite's default host parameter limit (`SQLITE_MAX_VARIABLE_NUMBER`).
pub const MAX_BULK_PARAMS: usize = 32_766;

/// Placeholder replaced with the generated VALUES list.
pub const VALUES_PLACEHOLDER: &str = "{values}";

/// A row that can be bound into a bulk statement.
pub trait BulkRow {
    /// Number of columns every row contributes.
    const COLUMNS: usize;

    /// Column values in statement order. Must return exactly `COLUMNS` values.
    fn values(&self) -> Vec<Value>;
}

/// Execute `sql` once for all `rows`. Returns the number of rows changed.
///
/// Empty input is a no-op. Inputs that would exceed [`MAX_BULK_PARAMS`] fail
/// before anything runs.
pub fn bulk_sql<R: BulkRow>(conn: &Connection, label: &str, sql: &str, rows: &[R]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }

    let params = rows.len() * R::COLUMNS;
    if params > MAX_BULK_PARAMS {
        return Err(SwitchyardError::BulkTooLarge {
            label: label.to_string(),
            params,
            limit: MAX_BULK_PARAMS,
        });
    }
    if !sql.contains(VALUES_PLACEHOLDER) {
        return Err(SwitchyardError::Data(format!(
            "bulk statement '{label}' has no {VALUES_PLACEHOLDER} placeholder"
        )));
    }

    let mut values = Vec::with_capacity(params);
    for row in rows {
        let row_values = row.values();
        if row_values.len() != R::COLUMNS {
            return Err(SwitchyardError::Data(format!(
                "bulk statement '{label}' expected {} columns, row has {}",
                R::COLUMNS,
                row_values.len()
            )));
        }
        values.extend(row_values);
    }

    let tuple = format!("({})", placeholders(R::COLUMNS));
    let list = vec![tuple; rows.len()].join(", ");
    let statement = sql.replace(VALUES_PLACEHOLDER, &list);

    let changed = conn
        .execute(&statement, rusqlite::params_from_iter(values.iter()))
        .map_err(|source| SwitchyardError::Bulk {
            label: label.to_string(),
            source,
        })?;
    tracing::debug!("bulk '{}': {} rows in, {} changed", label, rows.len(), changed);
    Ok(changed)
}

/// `?, ?, ?` with `n` parameters.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Split an id list into chunks that fit into one `IN (...)` list.
pub fn id_chunks<T>(ids: &[T]) -> std::slice::Chunks<'_, T> {
    ids.chunks(IN_LIST_CHUNK)
}

const IN_LIST_CHUNK: usize = 900;
