//! Error taxonomy for the query gateway core.
//!
//! Mirrors the propagation policy in spec.md §7: validation and sync errors
//! are reported to the caller without retry, contention is recovered locally
//! by the retry loop, driver/cancellation errors short-circuit batches. Every
//! variant carries enough structured context for the HTTP collaborator to
//! build a `{message, code, hint?}` body without re-parsing a string.

use std::fmt;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse error category, used by the (out-of-scope) HTTP collaborator to
/// pick a status code: validation -> 400, not-found -> 404, sync -> 409,
/// contention-after-budget -> 503, everything else -> 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Sync,
    NotFound,
    Contention,
    Driver,
    Cancelled,
}

/// Application errors that can be automatically turned into an appropriate
/// HTTP response by the (out-of-scope) collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    #[error("unknown table {table:?}")]
    UnknownTable { table: String },

    #[error("unknown column {column:?} on table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("unknown operator {op:?}")]
    UnknownOperator { op: String },

    #[error("empty `in` array for column {table}.{column}")]
    EmptyInArray { table: String, column: String },

    #[error("`in` array for {table}.{column} exceeds max size {max}")]
    InArrayTooLarge {
        table: String,
        column: String,
        max: usize,
    },

    #[error("`between` requires exactly 2 values for {table}.{column}")]
    BetweenArity { table: String, column: String },

    #[error("table {table:?} has no FTS index")]
    NoFtsIndex { table: String },

    #[error("negation of operator {op:?} is not supported")]
    UnsupportedNegation { op: String },

    #[error("`is` only accepts null or a boolean literal, got: {shape}")]
    InvalidIsShape { shape: String },

    #[error("malformed filter shape: {reason}")]
    MalformedFilter { reason: String },

    #[error("relation depth {depth} exceeds max depth {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("no foreign-key relationship from {from} to {to}")]
    NoRelationship { from: String, to: String },

    #[error("operation on reserved table {table:?} is not permitted")]
    ReservedTable { table: String },

    #[error("`where` clause is required and must be non-empty for {operation} on {table:?}")]
    RequiredWhereMissing { operation: &'static str, table: String },

    #[error("`data` must be a non-empty object or array of objects")]
    EmptyData,

    #[error("batch has {len} operations, exceeds max of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("operation {index} ({kind} on {table}): {cause}")]
    BatchOperation {
        index: usize,
        kind: &'static str,
        table: String,
        #[source]
        cause: Box<CoreError>,
    },

    #[error("tenant {name:?} not found")]
    TenantNotFound { name: String },

    #[error("template version not found: template {template_id}, version {version}")]
    TemplateVersionNotFound { template_id: i64, version: i64 },

    #[error(
        "tenant {name:?} is out of sync: recorded template version {recorded}, current is {current}"
    )]
    OutOfSync {
        name: String,
        recorded: i64,
        current: i64,
    },

    #[error("missing required Tenant header")]
    MissingTenantHeader,

    #[error("database is locked after exhausting retry budget")]
    LockBudgetExhausted,

    #[error("database error")]
    Driver(#[from] rusqlite::Error),

    #[error("json error")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Stable machine-readable error code for the wire response.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::UnknownTable { .. } => "unknown_table",
            Self::UnknownColumn { .. } => "unknown_column",
            Self::UnknownOperator { .. } => "unknown_operator",
            Self::EmptyInArray { .. } => "empty_in_array",
            Self::InArrayTooLarge { .. } => "in_array_too_large",
            Self::BetweenArity { .. } => "between_arity",
            Self::NoFtsIndex { .. } => "no_fts_index",
            Self::UnsupportedNegation { .. } => "unsupported_negation",
            Self::InvalidIsShape { .. } => "invalid_is_shape",
            Self::MalformedFilter { .. } => "malformed_filter",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::NoRelationship { .. } => "no_relationship",
            Self::ReservedTable { .. } => "reserved_table",
            Self::RequiredWhereMissing { .. } => "required_where_missing",
            Self::EmptyData => "empty_data",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::BatchOperation { .. } => "batch_operation_failed",
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::TemplateVersionNotFound { .. } => "template_version_not_found",
            Self::OutOfSync { .. } => "out_of_sync",
            Self::MissingTenantHeader => "missing_tenant_header",
            Self::LockBudgetExhausted => "lock_budget_exhausted",
            Self::Driver(_) => "driver_error",
            Self::Json(_) => "json_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Coarse category used to pick an HTTP status code.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. }
            | Self::UnknownTable { .. }
            | Self::UnknownColumn { .. }
            | Self::UnknownOperator { .. }
            | Self::EmptyInArray { .. }
            | Self::InArrayTooLarge { .. }
            | Self::BetweenArity { .. }
            | Self::NoFtsIndex { .. }
            | Self::UnsupportedNegation { .. }
            | Self::InvalidIsShape { .. }
            | Self::MalformedFilter { .. }
            | Self::DepthExceeded { .. }
            | Self::NoRelationship { .. }
            | Self::ReservedTable { .. }
            | Self::RequiredWhereMissing { .. }
            | Self::EmptyData
            | Self::BatchTooLarge { .. }
            | Self::MissingTenantHeader => ErrorKind::Validation,

            Self::BatchOperation { cause, .. } => cause.kind(),

            Self::TenantNotFound { .. } | Self::TemplateVersionNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::OutOfSync { .. } => ErrorKind::Sync,
            Self::LockBudgetExhausted => ErrorKind::Contention,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Driver(_) | Self::Json(_) => ErrorKind::Driver,
        }
    }

    /// Wrap this error with batch-operation context, per spec.md §7's
    /// required decoration: `"operation <i> (<kind> on <table>): <cause>"`.
    #[must_use]
    pub fn with_batch_context(self, index: usize, kind: &'static str, table: impl Into<String>) -> Self {
        Self::BatchOperation {
            index,
            kind,
            table: table.into(),
            cause: Box::new(self),
        }
    }
}

/// Detail payload the (out-of-scope) HTTP collaborator serializes.
#[derive(Debug, serde::Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl From<&CoreError> for ErrorDetail {
    fn from(err: &CoreError) -> Self {
        let hint = match err {
            CoreError::OutOfSync { .. } => Some(
                "the tenant's template was migrated; re-run the migration job or invalidate the cache"
                    .to_string(),
            ),
            CoreError::LockBudgetExhausted => {
                Some("the database is under heavy write contention; retry the request".to_string())
            }
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            hint,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Sync => "sync",
            Self::NotFound => "not_found",
            Self::Contention => "contention",
            Self::Driver => "driver",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
