//! Wire-level request DSL (spec.md §3, §6, §9).
//!
//! Decodes a request body directly into a tagged `Operation` variant rather
//! than decoding to a generic map and re-encoding into a typed struct (the
//! "re-encode then decode" anti-pattern spec.md §9 calls out in the source
//! this crate replaces).

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// A single item in a `select` list: a plain/qualified column name, or a
/// nested relation selecting columns from a joined table.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `"col"`, `"*"`, or a qualified `"table.col"` (used with custom joins).
    Column(String),
    /// `{"posts": ["title", ...]}` or `{"posts": {"columns": [...], "type": "inner"}}`.
    Nested {
        table: String,
        columns: Vec<SelectItem>,
        inner: bool,
    },
}

fn parse_select_items(value: &Value) -> Result<Vec<SelectItem>> {
    let Value::Array(items) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "`select` must be an array".to_string(),
        });
    };
    items.iter().map(parse_select_item).collect()
}

fn parse_select_item(value: &Value) -> Result<SelectItem> {
    match value {
        Value::String(s) => Ok(SelectItem::Column(s.clone())),
        Value::Object(map) => {
            let Some((table, inner_value)) = map.iter().next() else {
                return Err(CoreError::MalformedFilter {
                    reason: "nested select entry must have exactly one key".to_string(),
                });
            };
            let (columns, inner) = match inner_value {
                Value::Array(_) => (parse_select_items(inner_value)?, false),
                Value::Object(nested) => {
                    let columns = nested
                        .get("columns")
                        .map(parse_select_items)
                        .transpose()?
                        .unwrap_or_default();
                    let inner = nested
                        .get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t == "inner");
                    (columns, inner)
                }
                _ => {
                    return Err(CoreError::MalformedFilter {
                        reason: "nested select entry value must be an array or object".to_string(),
                    });
                }
            };
            Ok(SelectItem::Nested {
                table: table.clone(),
                columns,
                inner,
            })
        }
        _ => Err(CoreError::MalformedFilter {
            reason: "select entry must be a string or object".to_string(),
        }),
    }
}

/// Sort direction for an `order` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

fn parse_order(value: Option<&Value>) -> Result<Vec<(String, OrderDir)>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Object(map) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "`order` must be an object mapping column to direction".to_string(),
        });
    };
    map.iter()
        .map(|(col, dir)| {
            let dir_str = dir.as_str().ok_or_else(|| CoreError::MalformedFilter {
                reason: format!("order direction for {col:?} must be a string"),
            })?;
            let dir = match dir_str {
                "asc" => OrderDir::Asc,
                "desc" => OrderDir::Desc,
                other => {
                    return Err(CoreError::MalformedFilter {
                        reason: format!("unknown order direction {other:?}"),
                    });
                }
            };
            Ok((col.clone(), dir))
        })
        .collect()
}

/// Join type for a custom join clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Left,
    Inner,
}

/// One `on` condition of a custom join: exactly one key, both sides
/// qualified `table.column`.
#[derive(Debug, Clone)]
pub struct JoinCondition {
    pub left: String,
    pub op: String,
    pub right: String,
}

/// A single explicit join clause (spec.md §4.D.2).
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: String,
    pub join_type: JoinType,
    pub on: Vec<JoinCondition>,
    pub alias: Option<String>,
    pub flat: bool,
}

fn parse_joins(value: Option<&Value>) -> Result<Vec<JoinClause>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "`join` must be an array".to_string(),
        });
    };
    items.iter().map(parse_join_clause).collect()
}

fn parse_join_clause(value: &Value) -> Result<JoinClause> {
    let Value::Object(map) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "join clause must be an object".to_string(),
        });
    };
    let table = map
        .get("table")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::MalformedFilter {
            reason: "join clause missing `table`".to_string(),
        })?
        .to_string();

    let join_type = match map.get("type").and_then(Value::as_str) {
        Some("inner") => JoinType::Inner,
        Some("left") | None => JoinType::Left,
        Some(other) => {
            return Err(CoreError::MalformedFilter {
                reason: format!("unknown join type {other:?}"),
            });
        }
    };

    let on_value = map
        .get("on")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::MalformedFilter {
            reason: "join clause missing `on` array".to_string(),
        })?;

    let on = on_value
        .iter()
        .map(|cond| {
            let Value::Object(cond_map) = cond else {
                return Err(CoreError::MalformedFilter {
                    reason: "join `on` entry must be an object".to_string(),
                });
            };
            let (left, op_value) = cond_map.iter().next().ok_or_else(|| CoreError::MalformedFilter {
                reason: "join `on` entry must have exactly one key".to_string(),
            })?;
            let Value::Object(op_map) = op_value else {
                return Err(CoreError::MalformedFilter {
                    reason: "join `on` condition value must be an object".to_string(),
                });
            };
            let (op, right) = op_map.iter().next().ok_or_else(|| CoreError::MalformedFilter {
                reason: "join `on` condition must have exactly one operator".to_string(),
            })?;
            let right = right.as_str().ok_or_else(|| CoreError::MalformedFilter {
                reason: "join `on` right-hand side must be a qualified column string".to_string(),
            })?;
            Ok(JoinCondition {
                left: left.clone(),
                op: op.clone(),
                right: right.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let alias = map
        .get("alias")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let flat = map.get("flat").and_then(Value::as_bool).unwrap_or(false);

    Ok(JoinClause {
        table,
        join_type,
        on,
        alias,
        flat,
    })
}

fn parse_filters(value: Option<&Value>) -> Result<Vec<Value>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "`where` must be an array".to_string(),
        });
    };
    Ok(items.clone())
}

fn require_non_empty_filters(value: Option<&Value>, operation: &'static str, table: &str) -> Result<Vec<Value>> {
    let filters = parse_filters(value)?;
    if filters.is_empty() {
        return Err(CoreError::RequiredWhereMissing {
            operation,
            table: table.to_string(),
        });
    }
    Ok(filters)
}

fn parse_returning(value: Option<&Value>) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let Value::Array(items) = value else {
        return Err(CoreError::MalformedFilter {
            reason: "`returning` must be an array".to_string(),
        });
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(ToString::to_string)
                .ok_or_else(|| CoreError::MalformedFilter {
                    reason: "`returning` entries must be strings".to_string(),
                })
        })
        .collect()
}

/// A fully decoded `select` request.
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub select: Vec<SelectItem>,
    pub join: Vec<JoinClause>,
    pub filters: Vec<Value>,
    pub order: Vec<(String, OrderDir)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A fully decoded `insert`/`insert-ignore`/`upsert` request.
#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub rows: Vec<Map<String, Value>>,
    pub returning: Vec<String>,
}

fn parse_rows(value: Option<&Value>) -> Result<Vec<Map<String, Value>>> {
    let data = value.ok_or(CoreError::EmptyData)?;
    let rows = match data {
        Value::Object(obj) => vec![obj.clone()],
        Value::Array(items) => {
            if items.is_empty() {
                return Err(CoreError::EmptyData);
            }
            items
                .iter()
                .map(|row| {
                    row.as_object()
                        .cloned()
                        .ok_or(CoreError::EmptyData)
                })
                .collect::<Result<Vec<_>>>()?
        }
        _ => return Err(CoreError::EmptyData),
    };
    if rows.is_empty() || rows.iter().any(Map::is_empty) {
        return Err(CoreError::EmptyData);
    }
    Ok(rows)
}

/// A fully decoded `update` request.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub data: Map<String, Value>,
    pub filters: Vec<Value>,
}

/// A fully decoded `delete` request.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub filters: Vec<Value>,
}

/// The decoded operation body, tagged by kind — the direct structured
/// decode spec.md §9 calls for in place of decode-then-re-encode.
#[derive(Debug, Clone)]
pub enum Operation {
    Select(SelectRequest),
    Insert(InsertRequest),
    InsertIgnore(InsertRequest),
    Upsert(InsertRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

/// Conflict-resolution strategy parsed from the `Prefer` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Ignore,
    Replace,
}

/// The operation kind parsed from the `Prefer` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferOperation {
    Select,
    Insert,
    Update,
    Delete,
}

/// Parsed `Prefer` header (spec.md §6): comma-separated
/// `operation=...`, `on-conflict=...`, `count=exact` tokens, whitespace
/// stripped before comparison.
#[derive(Debug, Clone, Default)]
pub struct Prefer {
    pub operation: Option<PreferOperation>,
    pub on_conflict: Option<OnConflict>,
    pub count_exact: bool,
}

impl Prefer {
    /// Parse a raw `Prefer` header value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut prefer = Self::default();
        for token in raw.split(',') {
            let token = token.trim();
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "operation" => {
                    prefer.operation = match value {
                        "select" => Some(PreferOperation::Select),
                        "insert" => Some(PreferOperation::Insert),
                        "update" => Some(PreferOperation::Update),
                        "delete" => Some(PreferOperation::Delete),
                        _ => None,
                    };
                }
                "on-conflict" => {
                    prefer.on_conflict = match value {
                        "ignore" => Some(OnConflict::Ignore),
                        "replace" => Some(OnConflict::Replace),
                        _ => None,
                    };
                }
                "count" if value == "exact" => prefer.count_exact = true,
                _ => {}
            }
        }
        prefer
    }
}

/// Decode a select-shaped request body.
///
/// # Errors
///
/// Returns an error if any field has the wrong shape.
pub fn decode_select(body: &Value) -> Result<SelectRequest> {
    let select = body
        .get("select")
        .map(parse_select_items)
        .transpose()?
        .unwrap_or_else(|| vec![SelectItem::Column("*".to_string())]);
    Ok(SelectRequest {
        select,
        join: parse_joins(body.get("join"))?,
        filters: parse_filters(body.get("where"))?,
        order: parse_order(body.get("order"))?,
        limit: body.get("limit").and_then(Value::as_i64),
        offset: body.get("offset").and_then(Value::as_i64),
    })
}

/// Decode an insert/insert-ignore/upsert-shaped request body.
///
/// # Errors
///
/// Returns an error if `data` is missing, empty, or malformed.
pub fn decode_insert(body: &Value) -> Result<InsertRequest> {
    Ok(InsertRequest {
        rows: parse_rows(body.get("data"))?,
        returning: parse_returning(body.get("returning"))?,
    })
}

/// Decode an update-shaped request body.
///
/// # Errors
///
/// Returns an error if `data` is missing/malformed or `where` is empty.
pub fn decode_update(body: &Value, table: &str) -> Result<UpdateRequest> {
    let data = body
        .get("data")
        .and_then(Value::as_object)
        .cloned()
        .ok_or(CoreError::EmptyData)?;
    if data.is_empty() {
        return Err(CoreError::EmptyData);
    }
    Ok(UpdateRequest {
        data,
        filters: require_non_empty_filters(body.get("where"), "update", table)?,
    })
}

/// Decode a delete-shaped request body.
///
/// # Errors
///
/// Returns an error if `where` is missing or empty.
pub fn decode_delete(body: &Value, table: &str) -> Result<DeleteRequest> {
    Ok(DeleteRequest {
        filters: require_non_empty_filters(body.get("where"), "delete", table)?,
    })
}

/// One operation inside a `batch` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub operation: String,
    pub table: String,
    pub body: Value,
    #[serde(default)]
    pub count: bool,
}

/// Decode a `batch` request body into its ordered list of operations.
///
/// # Errors
///
/// Returns an error if the body isn't `{"batch": [...]}`-shaped.
pub fn decode_batch(body: &Value) -> Result<Vec<BatchItem>> {
    let items = body
        .get("batch")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::MalformedFilter {
            reason: "batch body must be `{\"batch\": [...]}`".to_string(),
        })?;
    items
        .iter()
        .map(|item| serde_json::from_value(item.clone()).map_err(CoreError::from))
        .collect()
}
