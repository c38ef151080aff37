//! Execution layer (spec.md §4.F): runs compiled [`crate::compile::Fragment`]s
//! against a real connection, with lock-contention retry and atomic batching.

pub mod batch;
pub mod retry;

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value as JsonValue};

use crate::compile::Fragment;
use crate::error::Result;

fn sql_to_json_value(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::Number((*i).into()),
        SqlValue::Real(f) => {
            serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
        }
        SqlValue::Text(s) => JsonValue::String(s.clone()),
        SqlValue::Blob(_) => JsonValue::Null,
    }
}

/// Decode one row into a JSON object. `json_columns` names the columns that
/// hold a `json_object`/`json_group_array` aggregate as SQLite TEXT rather
/// than a plain scalar — those are parsed back into real JSON instead of
/// being wrapped as a string.
fn row_to_json(row: &rusqlite::Row<'_>, columns: &[String], json_columns: &[String]) -> rusqlite::Result<JsonValue> {
    let mut obj = Map::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        let value: SqlValue = row.get(i)?;
        let json_value = if json_columns.iter().any(|c| c == name) {
            match value {
                SqlValue::Text(s) => serde_json::from_str(&s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(i, rusqlite::types::Type::Text, Box::new(e))
                })?,
                other => sql_to_json_value(&other),
            }
        } else {
            sql_to_json_value(&value)
        };
        obj.insert(name.clone(), json_value);
    }
    Ok(JsonValue::Object(obj))
}

/// Run a `SELECT`-shaped fragment, collecting every row into a JSON array.
/// Returns the raw `rusqlite` error so callers (the retry wrapper) can
/// classify it before it is converted into a [`crate::error::CoreError`].
///
/// # Errors
///
/// Returns an error if preparing or executing the statement fails.
pub fn select_rows(conn: &rusqlite::Connection, frag: &Fragment) -> rusqlite::Result<JsonValue> {
    let mut stmt = conn.prepare(&frag.sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let params = rusqlite::params_from_iter(frag.args.iter());
    let rows = stmt.query_map(params, |row| row_to_json(row, &columns, &frag.json_columns))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(JsonValue::Array(out))
}

/// Run a mutation fragment. If it carries a `RETURNING` clause, collects the
/// returned rows into a JSON array; otherwise returns `Null`. See
/// [`select_rows`] for why this returns the raw `rusqlite` error.
///
/// # Errors
///
/// Returns an error if preparing or executing the statement fails.
pub fn write_rows(conn: &rusqlite::Connection, frag: &Fragment) -> rusqlite::Result<JsonValue> {
    let params = rusqlite::params_from_iter(frag.args.iter());
    if frag.sql.contains(" RETURNING ") {
        let mut stmt = conn.prepare(&frag.sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let rows = stmt.query_map(params, |row| row_to_json(row, &columns, &frag.json_columns))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(JsonValue::Array(out))
    } else {
        conn.execute(&frag.sql, params)?;
        Ok(JsonValue::Null)
    }
}

/// [`select_rows`], converting its error into a [`crate::error::CoreError`].
///
/// # Errors
///
/// Returns an error if preparing or executing the statement fails.
pub fn run_select(conn: &rusqlite::Connection, frag: &Fragment) -> Result<JsonValue> {
    Ok(select_rows(conn, frag)?)
}

/// [`write_rows`], converting its error into a [`crate::error::CoreError`].
///
/// # Errors
///
/// Returns an error if preparing or executing the statement fails.
pub fn run_write(conn: &rusqlite::Connection, frag: &Fragment) -> Result<JsonValue> {
    Ok(write_rows(conn, frag)?)
}
