//! Request dispatch (spec.md §4.H): the seam an (out-of-scope) HTTP
//! collaborator calls into. Selects a compiler by operation kind, runs the
//! compiled fragment with lock-contention retry, and returns the JSON
//! result.

use serde_json::Value;

use crate::compile::{mutate, select};
use crate::context::{CancellationToken, CoreContext};
use crate::error::Result;
use crate::exec::{select_rows, write_rows};
use crate::exec::retry::execute_with_retry;
use crate::schema::Schema;
use crate::wire::Operation;

/// Compile and execute one non-batch operation.
///
/// # Errors
///
/// Returns any compile error from [`crate::compile`], or a driver/retry
/// error from [`crate::exec::retry::execute_with_retry`].
pub fn dispatch_query(
    ctx: &CoreContext,
    schema: &Schema,
    is_primary: bool,
    table: &str,
    operation: &Operation,
    cancel: &CancellationToken,
) -> Result<Value> {
    match operation {
        Operation::Select(req) => {
            let frag = select::compile_select(table, schema, req, &ctx.config)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| select_rows(conn, &frag))
        }
        Operation::Insert(req) => {
            let frag = mutate::compile_insert(table, schema, is_primary, req)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| write_rows(conn, &frag))
        }
        Operation::InsertIgnore(req) => {
            let frag = mutate::compile_insert_ignore(table, schema, is_primary, req)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| write_rows(conn, &frag))
        }
        Operation::Upsert(req) => {
            let frag = mutate::compile_upsert(table, schema, is_primary, req)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| write_rows(conn, &frag))
        }
        Operation::Update(req) => {
            let frag = mutate::compile_update(table, schema, is_primary, req, &ctx.config)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| write_rows(conn, &frag))
        }
        Operation::Delete(req) => {
            let frag = mutate::compile_delete(table, schema, is_primary, req, &ctx.config)?;
            execute_with_retry(&ctx.primary, &ctx.config, cancel, |conn| write_rows(conn, &frag))
        }
    }
}
