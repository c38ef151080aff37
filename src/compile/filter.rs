//! Filter/where compiler (spec.md §4.C).

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::compile::{Fragment, json_to_sql_value};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::guard::quote_ident;
use crate::schema::{Schema, Table};

/// Compile an ordered sequence of filter objects into a `WHERE` fragment.
///
/// Empty input yields an empty fragment with no args. The outer sequence is
/// ANDed; a single entry `{"or": [...]}` becomes `(f1 OR f2 OR ...)`.
///
/// # Errors
///
/// Returns a validation error for any unknown operator/column, empty `in`,
/// wrong-length `between`, FTS on a non-FTS table, or malformed shape. No
/// partial SQL is returned on error.
pub fn compile_filters(
    table: &str,
    schema: &Schema,
    filters: &[Value],
    config: &CoreConfig,
) -> Result<Fragment> {
    if filters.is_empty() {
        return Ok(Fragment::default());
    }

    let root = require_table(schema, table)?;
    let mut clauses = Vec::with_capacity(filters.len());
    let mut args = Vec::new();

    for entry in filters {
        let Some(obj) = entry.as_object() else {
            return Err(CoreError::MalformedFilter {
                reason: "each filter entry must be an object".to_string(),
            });
        };
        let (key, value) = single_entry(obj)?;

        if key == "or" {
            let frag = compile_or(table, root, schema, value, config)?;
            clauses.push(frag.sql);
            args.extend(frag.args);
        } else if key == "__fts" {
            let frag = compile_table_fts(root, value)?;
            clauses.push(frag.sql);
            args.extend(frag.args);
        } else {
            let frag = compile_column_filter(table, root, schema, key, value, config)?;
            clauses.push(frag.sql);
            args.extend(frag.args);
        }
    }

    Ok(Fragment::new(format!("WHERE {}", clauses.join(" AND ")), args))
}

fn single_entry(obj: &Map<String, Value>) -> Result<(&str, &Value)> {
    if obj.len() != 1 {
        return Err(CoreError::MalformedFilter {
            reason: "filter entry must have exactly one key".to_string(),
        });
    }
    let (k, v) = obj.iter().next().expect("checked len == 1");
    Ok((k.as_str(), v))
}

pub(crate) fn require_table<'a>(schema: &'a Schema, name: &str) -> Result<&'a Table> {
    schema
        .search_table(name)
        .ok_or_else(|| CoreError::UnknownTable {
            table: name.to_string(),
        })
}

/// Resolve a (possibly dot-qualified) filter key to the table it addresses
/// and the bare column name, per spec.md §4.C "Qualified paths".
fn resolve_path<'a>(
    default_table_name: &'a str,
    default_table: &'a Table,
    schema: &'a Schema,
    key: &'a str,
) -> Result<(&'a str, &'a Table, &'a str)> {
    if let Some((t, c)) = key.split_once('.') {
        let table = require_table(schema, t)?;
        Ok((t, table, c))
    } else {
        Ok((default_table_name, default_table, key))
    }
}

pub(crate) fn require_column<'t>(table: &'t Table, table_name: &str, column: &'t str) -> Result<&'t str> {
    if table.columns.contains_key(column) {
        Ok(column)
    } else {
        Err(CoreError::UnknownColumn {
            table: table_name.to_string(),
            column: column.to_string(),
        })
    }
}

fn compile_or(
    default_table_name: &str,
    default_table: &Table,
    schema: &Schema,
    value: &Value,
    config: &CoreConfig,
) -> Result<Fragment> {
    let Some(items) = value.as_array() else {
        return Err(CoreError::MalformedFilter {
            reason: "`or` value must be an array".to_string(),
        });
    };
    if items.is_empty() {
        return Err(CoreError::MalformedFilter {
            reason: "`or` array must not be empty".to_string(),
        });
    }

    let mut clauses = Vec::with_capacity(items.len());
    let mut args = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else {
            return Err(CoreError::MalformedFilter {
                reason: "each `or` entry must be an object".to_string(),
            });
        };
        let (key, op_value) = single_entry(obj)?;
        if key == "or" || key == "__fts" {
            return Err(CoreError::MalformedFilter {
                reason: "`or` entries must each be a single column filter".to_string(),
            });
        }
        let frag = compile_column_filter(
            default_table_name,
            default_table,
            schema,
            key,
            op_value,
            config,
        )?;
        clauses.push(frag.sql);
        args.extend(frag.args);
    }

    Ok(Fragment::new(format!("({})", clauses.join(" OR ")), args))
}

fn compile_table_fts(table: &Table, value: &Value) -> Result<Fragment> {
    if table.fts_columns.is_empty() {
        return Err(CoreError::NoFtsIndex {
            table: table.name.clone(),
        });
    }
    let query = value
        .get("fts")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::MalformedFilter {
            reason: "`__fts` value must be `{\"fts\": \"<query>\"}`".to_string(),
        })?;
    let fts_table = quote_ident(&Schema::fts_table_name(&table.name));
    Ok(Fragment::new(
        format!("rowid IN (SELECT rowid FROM {fts_table} WHERE {fts_table} MATCH ?)"),
        vec![SqlValue::Text(query.to_string())],
    ))
}

/// A single filter `{ op: value }` map, possibly wrapped in `{"not": {...}}`.
fn split_negation(value: &Value) -> Result<(bool, &str, &Value)> {
    let Some(obj) = value.as_object() else {
        return Err(CoreError::MalformedFilter {
            reason: "operator map must be an object".to_string(),
        });
    };
    let (op, op_value) = single_entry(obj)?;
    if op == "not" {
        let Some(inner) = op_value.as_object() else {
            return Err(CoreError::MalformedFilter {
                reason: "`not` value must itself be an operator map".to_string(),
            });
        };
        let (inner_op, inner_value) = single_entry(inner)?;
        Ok((true, inner_op, inner_value))
    } else {
        Ok((false, op, op_value))
    }
}

fn is_column_ref(value: &Value) -> Option<&str> {
    value.as_object().and_then(|obj| {
        if obj.len() == 1 {
            obj.get("__col").and_then(Value::as_str)
        } else {
            None
        }
    })
}

fn compile_column_filter(
    default_table_name: &str,
    default_table: &Table,
    schema: &Schema,
    key: &str,
    op_value: &Value,
    config: &CoreConfig,
) -> Result<Fragment> {
    let (table_name, table, column) =
        resolve_path(default_table_name, default_table, schema, key)?;
    let column = require_column(table, table_name, column)?;
    let (negate, op, value) = split_negation(op_value)?;

    let col_ref = quote_ident(table_name) + "." + &quote_ident(column);

    macro_rules! require_not_negated {
        ($op:expr) => {
            if negate {
                return Err(CoreError::UnsupportedNegation {
                    op: $op.to_string(),
                });
            }
        };
    }

    match op {
        "eq" | "neq" | "gt" | "gte" | "lt" | "lte" => {
            let sql_op = match (op, negate) {
                ("eq", false) => "=",
                ("eq", true) => "!=",
                ("neq", false) => "!=",
                ("neq", true) => "=",
                ("gt", false) => ">",
                ("gte", false) => ">=",
                ("lt", false) => "<",
                ("lte", false) => "<=",
                (other, true) => {
                    return Err(CoreError::UnsupportedNegation {
                        op: other.to_string(),
                    });
                }
                _ => unreachable!(),
            };
            if let Some(other_col) = is_column_ref(value) {
                let other_col = require_column(table, table_name, other_col)?;
                let other_ref = quote_ident(table_name) + "." + &quote_ident(other_col);
                Ok(Fragment::new(format!("{col_ref} {sql_op} {other_ref}"), vec![]))
            } else {
                let sql_value = json_to_sql_value(value)?;
                Ok(Fragment::new(format!("{col_ref} {sql_op} ?"), vec![sql_value]))
            }
        }
        "like" | "glob" => {
            let sql_op = match op {
                "like" => "LIKE",
                _ => "GLOB",
            };
            let sql_op = if negate {
                match sql_op {
                    "LIKE" => "NOT LIKE",
                    _ => "NOT GLOB",
                }
            } else {
                sql_op
            };
            let Some(s) = value.as_str() else {
                return Err(CoreError::MalformedFilter {
                    reason: format!("`{op}` requires a string value"),
                });
            };
            Ok(Fragment::new(
                format!("{col_ref} {sql_op} ?"),
                vec![SqlValue::Text(s.to_string())],
            ))
        }
        "in" => {
            let Some(items) = value.as_array() else {
                return Err(CoreError::MalformedFilter {
                    reason: "`in` requires an array value".to_string(),
                });
            };
            if items.is_empty() {
                return Err(CoreError::EmptyInArray {
                    table: table_name.to_string(),
                    column: column.to_string(),
                });
            }
            if items.len() > config.max_in_array_size {
                return Err(CoreError::InArrayTooLarge {
                    table: table_name.to_string(),
                    column: column.to_string(),
                    max: config.max_in_array_size,
                });
            }
            let args = items
                .iter()
                .map(json_to_sql_value)
                .collect::<Result<Vec<_>>>()?;
            let placeholders = std::iter::repeat_n("?", args.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql_op = if negate { "NOT IN" } else { "IN" };
            Ok(Fragment::new(format!("{col_ref} {sql_op} ({placeholders})"), args))
        }
        "between" => {
            require_not_negated!("between");
            let Some(items) = value.as_array() else {
                return Err(CoreError::MalformedFilter {
                    reason: "`between` requires an array value".to_string(),
                });
            };
            if items.len() != 2 {
                return Err(CoreError::BetweenArity {
                    table: table_name.to_string(),
                    column: column.to_string(),
                });
            }
            let lo = json_to_sql_value(&items[0])?;
            let hi = json_to_sql_value(&items[1])?;
            Ok(Fragment::new(format!("{col_ref} BETWEEN ? AND ?"), vec![lo, hi]))
        }
        "is" => compile_is(&col_ref, value, negate),
        "fts" => {
            require_not_negated!("fts");
            if table.fts_columns.is_empty() {
                return Err(CoreError::NoFtsIndex {
                    table: table_name.to_string(),
                });
            }
            let Some(s) = value.as_str() else {
                return Err(CoreError::MalformedFilter {
                    reason: "`fts` requires a string value".to_string(),
                });
            };
            let fts_table = quote_ident(&Schema::fts_table_name(table_name));
            let col_ident = quote_ident(column);
            Ok(Fragment::new(
                format!("rowid IN (SELECT rowid FROM {fts_table} WHERE {col_ident} MATCH ?)"),
                vec![SqlValue::Text(s.to_string())],
            ))
        }
        other => Err(CoreError::UnknownOperator {
            op: other.to_string(),
        }),
    }
}

/// `is` per the resolved Open Question (spec.md §9): `null` -> `IS NULL`;
/// a boolean literal -> `IS 1`/`IS 0` inlined (no placeholder); any other
/// shape is a validation error.
fn compile_is(col_ref: &str, value: &Value, negate: bool) -> Result<Fragment> {
    let keyword = if negate { "IS NOT" } else { "IS" };
    match value {
        Value::Null => Ok(Fragment::new(format!("{col_ref} {keyword} NULL"), vec![])),
        Value::Bool(b) => {
            let literal = i32::from(*b);
            Ok(Fragment::new(format!("{col_ref} {keyword} {literal}"), vec![]))
        }
        other => Err(CoreError::InvalidIsShape {
            shape: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Column, ColumnType, tables_to_snapshot};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn schema_with_users() -> Schema {
        let mut columns = BTreeMap::new();
        columns.insert(
            "id".to_string(),
            Column {
                data_type: ColumnType::Integer,
                constraints: vec![],
                default: None,
                references: None,
            },
        );
        columns.insert(
            "name".to_string(),
            Column {
                data_type: ColumnType::Text,
                constraints: vec![],
                default: None,
                references: None,
            },
        );
        columns.insert(
            "age".to_string(),
            Column {
                data_type: ColumnType::Integer,
                constraints: vec![],
                default: None,
                references: None,
            },
        );
        let mut table = Table {
            name: "users".to_string(),
            pk: vec!["id".to_string()],
            columns,
            indexes: vec![],
            fts_columns: vec![],
        };
        table.fts_columns.push("name".to_string());
        tables_to_snapshot(vec![table])
    }

    #[test]
    fn empty_filters_yield_empty_fragment() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let frag = compile_filters("users", &schema, &[], &config).unwrap();
        assert_eq!(frag.sql, "");
        assert!(frag.args.is_empty());
    }

    #[test]
    fn simple_eq_filter() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"id": {"eq": 5}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE [users].[id] = ?");
        assert_eq!(frag.placeholder_count(), frag.args.len());
    }

    #[test]
    fn empty_in_array_is_rejected() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"id": {"in": []}})];
        assert!(compile_filters("users", &schema, &filters, &config).is_err());
    }

    #[test]
    fn between_requires_two_elements() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"age": {"between": [1, 2, 3]}})];
        assert!(compile_filters("users", &schema, &filters, &config).is_err());
    }

    #[test]
    fn or_group_wraps_in_parens() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"or": [{"id": {"eq": 1}}, {"id": {"eq": 2}}]})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE ([users].[id] = ? OR [users].[id] = ?)");
        assert_eq!(frag.args.len(), 2);
    }

    #[test]
    fn not_eq_becomes_not_equal() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"id": {"not": {"eq": 5}}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE [users].[id] != ?");
    }

    #[test]
    fn not_between_is_rejected() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"age": {"not": {"between": [1, 2]}}})];
        assert!(compile_filters("users", &schema, &filters, &config).is_err());
    }

    #[test]
    fn is_null_and_is_bool() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"name": {"is": null}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE [users].[name] IS NULL");

        let filters = vec![json!({"name": {"is": true}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE [users].[name] IS 1");
        assert!(frag.args.is_empty());
    }

    #[test]
    fn is_string_literal_is_rejected() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"name": {"is": "x"}})];
        assert!(compile_filters("users", &schema, &filters, &config).is_err());
    }

    #[test]
    fn fts_requires_fts_table() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"__fts": {"fts": "hello"}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert!(frag.sql.contains("users_fts"));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"id": {"frobnicate": 1}})];
        assert!(compile_filters("users", &schema, &filters, &config).is_err());
    }

    #[test]
    fn column_reference_emits_no_placeholder() {
        let schema = schema_with_users();
        let config = CoreConfig::default();
        let filters = vec![json!({"id": {"eq": {"__col": "age"}}})];
        let frag = compile_filters("users", &schema, &filters, &config).unwrap();
        assert_eq!(frag.sql, "WHERE [users].[id] = [users].[age]");
        assert!(frag.args.is_empty());
    }
}
