//! Batch transaction executor (spec.md §4.F): runs a sequence of operations
//! inside one transaction, rolling back the whole batch on any error and
//! decorating the failure with its position (spec.md §7).

use rusqlite::Connection;
use serde_json::Value;

use crate::compile::{mutate, select};
use crate::config::CoreConfig;
use crate::context::CancellationToken;
use crate::error::{CoreError, Result};
use crate::exec::retry::execute_with_retry;
use crate::exec::{select_rows, write_rows};
use crate::schema::Schema;
use crate::wire::{self, BatchItem};

/// The per-operation results of a committed batch, in request order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<Value>,
}

/// Execute `items` as one atomic transaction against `conn`.
///
/// # Errors
///
/// Returns [`CoreError::BatchTooLarge`] before opening a transaction if
/// `items` exceeds `config.max_batch_operations`. Any operation failure
/// rolls back the whole batch and is returned wrapped in
/// [`CoreError::BatchOperation`] via [`CoreError::with_batch_context`].
pub fn execute_batch(
    conn: &mut Connection,
    schema: &Schema,
    is_primary: bool,
    config: &CoreConfig,
    items: &[BatchItem],
    cancel: &CancellationToken,
) -> Result<BatchOutcome> {
    if items.len() > config.max_batch_operations {
        return Err(CoreError::BatchTooLarge {
            len: items.len(),
            max: config.max_batch_operations,
        });
    }

    let tx = conn.transaction().map_err(CoreError::from)?;
    let mut results = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let kind = operation_kind(&item.operation);
        let value = run_one(&tx, schema, is_primary, config, item, cancel)
            .map_err(|err| err.with_batch_context(index, kind, item.table.clone()))?;
        results.push(value);
    }

    tx.commit().map_err(CoreError::from)?;
    Ok(BatchOutcome { results })
}

fn operation_kind(op: &str) -> &'static str {
    match op {
        "select" => "select",
        "insert" => "insert",
        "insert-ignore" => "insert-ignore",
        "upsert" => "upsert",
        "update" => "update",
        "delete" => "delete",
        _ => "unknown",
    }
}

fn run_one(
    tx: &rusqlite::Transaction<'_>,
    schema: &Schema,
    is_primary: bool,
    config: &CoreConfig,
    item: &BatchItem,
    cancel: &CancellationToken,
) -> Result<Value> {
    match item.operation.as_str() {
        "select" => {
            let req = wire::decode_select(&item.body)?;
            let frag = select::compile_select(&item.table, schema, &req, config)?;
            execute_with_retry(tx, config, cancel, |conn| select_rows(conn, &frag))
        }
        "insert" => {
            let req = wire::decode_insert(&item.body)?;
            let frag = mutate::compile_insert(&item.table, schema, is_primary, &req)?;
            execute_with_retry(tx, config, cancel, |conn| write_rows(conn, &frag))
        }
        "insert-ignore" => {
            let req = wire::decode_insert(&item.body)?;
            let frag = mutate::compile_insert_ignore(&item.table, schema, is_primary, &req)?;
            execute_with_retry(tx, config, cancel, |conn| write_rows(conn, &frag))
        }
        "upsert" => {
            let req = wire::decode_insert(&item.body)?;
            let frag = mutate::compile_upsert(&item.table, schema, is_primary, &req)?;
            execute_with_retry(tx, config, cancel, |conn| write_rows(conn, &frag))
        }
        "update" => {
            let req = wire::decode_update(&item.body, &item.table)?;
            let frag = mutate::compile_update(&item.table, schema, is_primary, &req, config)?;
            execute_with_retry(tx, config, cancel, |conn| write_rows(conn, &frag))
        }
        "delete" => {
            let req = wire::decode_delete(&item.body, &item.table)?;
            let frag = mutate::compile_delete(&item.table, schema, is_primary, &req, config)?;
            execute_with_retry(tx, config, cancel, |conn| write_rows(conn, &frag))
        }
        other => Err(CoreError::MalformedFilter {
            reason: format!("unknown batch operation {other:?}"),
        }),
    }
}
