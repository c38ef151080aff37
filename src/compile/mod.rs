//! The query compilers (spec.md §4.C–§4.E): JSON DSL fragments in,
//! parameterized SQL text and argument vectors out. Nothing in this module
//! executes a statement; see [`crate::exec`] for that.

pub mod filter;
pub mod mutate;
pub mod relation;
pub mod select;

use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Convert a decoded JSON scalar into a `rusqlite` bind value.
///
/// # Errors
///
/// Returns an error if `value` is an array or object (neither is a valid
/// scalar filter/mutation argument).
pub fn json_to_sql_value(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(CoreError::MalformedFilter {
                    reason: format!("number {n} is out of range"),
                })
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(CoreError::MalformedFilter {
            reason: "expected a scalar value".to_string(),
        }),
    }
}

/// A compiled fragment: SQL text plus its aligned argument vector.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<SqlValue>,
    /// Names of top-level result columns holding a `json_object`/
    /// `json_group_array` aggregate as SQLite TEXT, rather than a plain
    /// scalar — [`crate::exec`] re-parses these instead of treating them
    /// as JSON strings.
    pub json_columns: Vec<String>,
}

impl Fragment {
    #[must_use]
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
            json_columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_json_columns(mut self, json_columns: Vec<String>) -> Self {
        self.json_columns = json_columns;
        self
    }

    /// Number of `?` placeholders in `sql`. Used by the parameterization
    /// invariant test (spec.md §8).
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}
