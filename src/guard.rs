//! Identifier & value guards (spec.md §4.A).
//!
//! No SQL is emitted anywhere in this crate without every identifier it
//! touches having passed through [`validate_identifier`] first.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

/// Reserved internal table name prefix; no user-visible table or column may
/// begin with it.
pub const RESERVED_PREFIX: &str = "atomicbase_";

/// The tenant registry table on the primary database.
pub const TENANTS_TABLE: &str = "atomicbase_tenants";
/// The schema template catalog on the primary database.
pub const TEMPLATES_TABLE: &str = "atomicbase_schema_templates";
/// The per-version schema history on the primary database.
pub const TEMPLATES_HISTORY_TABLE: &str = "atomicbase_templates_history";

/// Names reserved outright, regardless of prefix.
const RESERVED_EXACT: &[&str] = &[
    TENANTS_TABLE,
    TEMPLATES_TABLE,
    TEMPLATES_HISTORY_TABLE,
    "sqlite_master",
    "sqlite_sequence",
    "rowid",
];

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex compiles"));

/// Validate a user-supplied name (table, column, alias).
///
/// # Errors
///
/// Returns [`CoreError::InvalidIdentifier`] if `name` is empty, doesn't
/// match `[A-Za-z_][A-Za-z0-9_]*`, starts with the reserved internal prefix,
/// or equals a reserved internal name exactly.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier must not be empty",
        });
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(CoreError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier must match [A-Za-z_][A-Za-z0-9_]*",
        });
    }
    if RESERVED_EXACT.contains(&name) {
        return Err(CoreError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier is a reserved internal name",
        });
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(CoreError::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier starts with the reserved internal prefix",
        });
    }
    Ok(())
}

/// Validate a table name, additionally forbidding the reserved tenants
/// table when the active handle is the primary database.
///
/// # Errors
///
/// Returns an error if the name fails [`validate_identifier`], or if
/// `is_primary` is true and `name` names one of the internal metadata
/// tables.
pub fn validate_table_name(name: &str, is_primary: bool) -> Result<()> {
    validate_identifier(name)?;
    if is_primary
        && (name == TENANTS_TABLE || name == TEMPLATES_TABLE || name == TEMPLATES_HISTORY_TABLE)
    {
        return Err(CoreError::ReservedTable {
            table: name.to_string(),
        });
    }
    Ok(())
}

/// Validate `name` as an identifier, then escape embedded single quotes by
/// doubling them so the result is safe as a SQL string literal used as a
/// JSON object key (e.g. in `json_object('<key>', ...)`).
///
/// # Errors
///
/// Returns an error if `name` fails [`validate_identifier`].
pub fn sanitize_json_key(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(name.replace('\'', "''"))
}

/// Quote an already-validated identifier for use in SQL as `[name]`.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{name}]")
}

/// Coarse classification of a driver error, used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorClass {
    Lock,
    Conflict,
    NotFound,
    Other,
}

/// Classify a driver error. Lock/contention detection is the single
/// acceptable string-substring dependency in this crate (SQLite does not
/// expose a typed "busy" error distinct from other `SQLITE_BUSY`/
/// `SQLITE_LOCKED` conditions through `rusqlite`'s message text); every
/// other classification comes from `rusqlite`'s typed error variants.
#[must_use]
pub fn classify_driver_error(err: &rusqlite::Error) -> DriverErrorClass {
    if let rusqlite::Error::SqliteFailure(sqlite_err, _) = err {
        match sqlite_err.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                return DriverErrorClass::Lock;
            }
            rusqlite::ErrorCode::ConstraintViolation => return DriverErrorClass::Conflict,
            _ => {}
        }
    }
    if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
        return DriverErrorClass::NotFound;
    }

    let message = err.to_string();
    if message.contains("database is locked") || message.contains("table is locked") {
        return DriverErrorClass::Lock;
    }

    DriverErrorClass::Other
}
