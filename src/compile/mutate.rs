//! Mutation compilers (spec.md §4.E): insert, insert-ignore, upsert, update,
//! delete. Each produces one parameterized [`Fragment`]; batching multiple
//! rows into one statement is handled here, batching multiple *operations*
//! is [`crate::exec::batch`]'s job.

use std::collections::BTreeSet;

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::compile::filter::{require_column, require_table};
use crate::compile::select::resolve_columns;
use crate::compile::{Fragment, filter, json_to_sql_value};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::guard::{quote_ident, validate_table_name};
use crate::schema::{Schema, Table};
use crate::wire::{DeleteRequest, InsertRequest, UpdateRequest};

struct InsertCore {
    sql: String,
    args: Vec<SqlValue>,
    columns: Vec<String>,
}

fn build_insert_core(
    table: &str,
    schema: &Schema,
    is_primary: bool,
    rows: &[Map<String, Value>],
    or_clause: &str,
) -> Result<InsertCore> {
    validate_table_name(table, is_primary)?;
    let root = require_table(schema, table)?;
    if rows.is_empty() {
        return Err(CoreError::EmptyData);
    }

    let columns: Vec<String> = rows[0].keys().cloned().collect();
    let expected: BTreeSet<&String> = columns.iter().collect();
    for row in rows {
        let keys: BTreeSet<&String> = row.keys().collect();
        if keys != expected {
            return Err(CoreError::MalformedFilter {
                reason: "all rows in a batch insert must share the same set of columns"
                    .to_string(),
            });
        }
    }
    for col in &columns {
        require_column(root, table, col)?;
    }

    let mut args = Vec::with_capacity(rows.len() * columns.len());
    let mut row_sql = Vec::with_capacity(rows.len());
    for row in rows {
        let mut placeholders = Vec::with_capacity(columns.len());
        for col in &columns {
            let value = row.get(col).expect("validated against the shared key set");
            args.push(json_to_sql_value(value)?);
            placeholders.push("?");
        }
        row_sql.push(format!("({})", placeholders.join(", ")));
    }

    let cols_sql = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let prefix = if or_clause.is_empty() {
        "INSERT".to_string()
    } else {
        format!("INSERT {or_clause}")
    };
    let sql = format!(
        "{prefix} INTO {} ({cols_sql}) VALUES {}",
        quote_ident(table),
        row_sql.join(", ")
    );

    Ok(InsertCore { sql, args, columns })
}

fn append_returning(sql: &mut String, table: &str, root: &Table, returning: &[String]) -> Result<()> {
    if returning.is_empty() {
        return Ok(());
    }
    let mut cols = Vec::with_capacity(returning.len());
    for col in returning {
        if col == "*" {
            cols.extend(resolve_columns(root, &[]));
        } else {
            require_column(root, table, col)?;
            cols.push(col.clone());
        }
    }
    let list = cols
        .iter()
        .map(|c| format!("{}.{}", quote_ident(table), quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    sql.push_str(" RETURNING ");
    sql.push_str(&list);
    Ok(())
}

/// Compile a plain multi-row insert.
///
/// # Errors
///
/// Returns an error if `table` is reserved/unknown, `req.rows` is empty,
/// rows don't share an identical column set, or a column/returning entry is
/// unknown.
pub fn compile_insert(table: &str, schema: &Schema, is_primary: bool, req: &InsertRequest) -> Result<Fragment> {
    validate_table_name(table, is_primary)?;
    let root = require_table(schema, table)?;
    let core = build_insert_core(table, schema, is_primary, &req.rows, "")?;
    let mut sql = core.sql;
    append_returning(&mut sql, table, root, &req.returning)?;
    Ok(Fragment::new(sql, core.args))
}

/// Compile an `INSERT OR IGNORE`.
///
/// # Errors
///
/// Same as [`compile_insert`].
pub fn compile_insert_ignore(
    table: &str,
    schema: &Schema,
    is_primary: bool,
    req: &InsertRequest,
) -> Result<Fragment> {
    validate_table_name(table, is_primary)?;
    let root = require_table(schema, table)?;
    let core = build_insert_core(table, schema, is_primary, &req.rows, "OR IGNORE")?;
    let mut sql = core.sql;
    append_returning(&mut sql, table, root, &req.returning)?;
    Ok(Fragment::new(sql, core.args))
}

/// Compile an upsert: `INSERT ... ON CONFLICT (<pk>) DO UPDATE SET ...`.
/// The conflict target is the table's (possibly composite) primary key.
///
/// # Errors
///
/// Same as [`compile_insert`], plus an error if `table` has no primary key.
pub fn compile_upsert(table: &str, schema: &Schema, is_primary: bool, req: &InsertRequest) -> Result<Fragment> {
    validate_table_name(table, is_primary)?;
    let root = require_table(schema, table)?;
    if root.pk.is_empty() {
        return Err(CoreError::MalformedFilter {
            reason: format!("table {table:?} has no primary key, cannot upsert"),
        });
    }
    let core = build_insert_core(table, schema, is_primary, &req.rows, "")?;

    let conflict_target = root
        .pk
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let update_cols: Vec<&String> = core.columns.iter().filter(|c| !root.pk.contains(c)).collect();
    let set_clause = if update_cols.is_empty() {
        let pk0 = quote_ident(&root.pk[0]);
        format!("{pk0} = {pk0}")
    } else {
        update_cols
            .iter()
            .map(|c| {
                let ident = quote_ident(c);
                format!("{ident} = excluded.{ident}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = core.sql;
    sql.push_str(&format!(" ON CONFLICT ({conflict_target}) DO UPDATE SET {set_clause}"));
    append_returning(&mut sql, table, root, &req.returning)?;
    Ok(Fragment::new(sql, core.args))
}

/// Compile an update. Requires a non-empty `where` (spec.md §4.E,
/// required-where invariant).
///
/// # Errors
///
/// Returns an error if `table` is reserved/unknown, `req.data` is empty, a
/// data/filter column is unknown, or `req.filters` is empty.
pub fn compile_update(
    table: &str,
    schema: &Schema,
    is_primary: bool,
    req: &UpdateRequest,
    config: &CoreConfig,
) -> Result<Fragment> {
    validate_table_name(table, is_primary)?;
    let root = require_table(schema, table)?;
    if req.data.is_empty() {
        return Err(CoreError::EmptyData);
    }

    let mut set_parts = Vec::with_capacity(req.data.len());
    let mut args = Vec::with_capacity(req.data.len());
    for (col, value) in &req.data {
        require_column(root, table, col)?;
        set_parts.push(format!("{} = ?", quote_ident(col)));
        args.push(json_to_sql_value(value)?);
    }

    let where_frag = filter::compile_filters(table, schema, &req.filters, config)?;
    if where_frag.sql.is_empty() {
        return Err(CoreError::RequiredWhereMissing {
            operation: "update",
            table: table.to_string(),
        });
    }

    let sql = format!(
        "UPDATE {} SET {} {}",
        quote_ident(table),
        set_parts.join(", "),
        where_frag.sql
    );
    args.extend(where_frag.args);
    Ok(Fragment::new(sql, args))
}

/// Compile a delete. Requires a non-empty `where` (spec.md §4.E,
/// required-where invariant).
///
/// # Errors
///
/// Returns an error if `table` is reserved/unknown, `req.filters` is empty,
/// or a filter is malformed.
pub fn compile_delete(
    table: &str,
    schema: &Schema,
    is_primary: bool,
    req: &DeleteRequest,
    config: &CoreConfig,
) -> Result<Fragment> {
    validate_table_name(table, is_primary)?;
    require_table(schema, table)?;

    let where_frag = filter::compile_filters(table, schema, &req.filters, config)?;
    if where_frag.sql.is_empty() {
        return Err(CoreError::RequiredWhereMissing {
            operation: "delete",
            table: table.to_string(),
        });
    }

    let sql = format!("DELETE FROM {} {}", quote_ident(table), where_frag.sql);
    Ok(Fragment::new(sql, where_frag.args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Column, ColumnType, tables_to_snapshot};
    use crate::wire::{decode_delete, decode_insert, decode_update};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn schema() -> Schema {
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
        let table = Table {
            name: "users".to_string(),
            pk: vec!["id".to_string()],
            columns,
            indexes: vec![],
            fts_columns: vec![],
        };
        tables_to_snapshot(vec![table])
    }

    #[test]
    fn insert_builds_multi_row_values() {
        let schema = schema();
        let body = json!({ "data": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}], "returning": ["id"] });
        let req = decode_insert(&body).unwrap();
        let frag = compile_insert("users", &schema, true, &req).unwrap();
        assert!(frag.sql.starts_with("INSERT INTO [users] ("));
        assert!(frag.sql.contains("VALUES (?, ?), (?, ?)"));
        assert!(frag.sql.ends_with("RETURNING [users].[id]"));
        assert_eq!(frag.args.len(), 4);
    }

    #[test]
    fn insert_rejects_mismatched_row_columns() {
        let schema = schema();
        let body = json!({ "data": [{"id": 1, "name": "a"}, {"id": 2}] });
        let req = decode_insert(&body).unwrap();
        assert!(compile_insert("users", &schema, true, &req).is_err());
    }

    #[test]
    fn insert_ignore_adds_or_ignore() {
        let schema = schema();
        let body = json!({ "data": {"id": 1, "name": "a"} });
        let req = decode_insert(&body).unwrap();
        let frag = compile_insert_ignore("users", &schema, true, &req).unwrap();
        assert!(frag.sql.starts_with("INSERT OR IGNORE INTO"));
    }

    #[test]
    fn upsert_targets_primary_key() {
        let schema = schema();
        let body = json!({ "data": {"id": 1, "name": "a"} });
        let req = decode_insert(&body).unwrap();
        let frag = compile_upsert("users", &schema, true, &req).unwrap();
        assert!(frag.sql.contains("ON CONFLICT ([id]) DO UPDATE SET [name] = excluded.[name]"));
    }

    #[test]
    fn update_requires_where() {
        let schema = schema();
        let config = CoreConfig::default();
        let body = json!({ "data": {"name": "b"}, "where": [{"id": {"eq": 1}}] });
        let req = decode_update(&body, "users").unwrap();
        let frag = compile_update("users", &schema, true, &req, &config).unwrap();
        assert!(frag.sql.starts_with("UPDATE [users] SET [name] = ? WHERE"));
        assert_eq!(frag.args.len(), 2);
    }

    #[test]
    fn delete_compiles_with_where() {
        let schema = schema();
        let config = CoreConfig::default();
        let body = json!({ "where": [{"id": {"eq": 1}}] });
        let req = decode_delete(&body, "users").unwrap();
        let frag = compile_delete("users", &schema, true, &req, &config).unwrap();
        assert_eq!(frag.sql, "DELETE FROM [users] WHERE [users].[id] = ?");
    }

    #[test]
    fn reserved_table_is_rejected() {
        let schema = schema();
        let body = json!({ "data": {"id": 1, "name": "a"} });
        let req = decode_insert(&body).unwrap();
        let err = compile_insert("atomicbase_tenants", &schema, true, &req).unwrap_err();
        assert_eq!(err.code(), "invalid_identifier");
    }
}
