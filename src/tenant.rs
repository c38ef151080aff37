//! Tenant resolution (spec.md §4.G): the primary database (template id 0)
//! versus external tenant handles, each bound to a schema template version
//! recorded in `atomicbase_tenants`.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

use crate::context::CoreContext;
use crate::error::{CoreError, Result};
use crate::guard::{TENANTS_TABLE, validate_identifier};
use crate::schema::Schema;
use crate::schema::store::ConnTemplateLoader;

/// A resolved connection plus the schema snapshot it was opened against.
#[derive(Debug)]
pub struct TenantHandle {
    pub name: String,
    pub conn: Connection,
    pub schema: Arc<Schema>,
    pub is_primary: bool,
}

/// Resolve the primary database's current schema snapshot. The primary
/// connection itself is the one already held by `ctx`.
///
/// # Errors
///
/// Returns an error if the primary schema template cannot be loaded.
pub fn connect_primary(ctx: &CoreContext) -> Result<Arc<Schema>> {
    let loader = ConnTemplateLoader { conn: &ctx.primary };
    let (schema, _version) = ctx.schema_cache.get_cached(&loader, crate::schema::PRIMARY_TEMPLATE_ID)?;
    Ok(schema)
}

struct TenantRecord {
    template_id: i64,
    template_version: i64,
}

fn lookup_tenant(ctx: &CoreContext, name: &str) -> Result<TenantRecord> {
    ctx.primary
        .query_row(
            &format!("SELECT template_id, template_version FROM {TENANTS_TABLE} WHERE name = ?1"),
            [name],
            |row| {
                Ok(TenantRecord {
                    template_id: row.get(0)?,
                    template_version: row.get(1)?,
                })
            },
        )
        .map_err(|_| CoreError::TenantNotFound {
            name: name.to_string(),
        })
}

/// Resolve and open an external tenant's database by name.
///
/// `data_dir` is the directory holding one SQLite file per tenant, named
/// `{name}.db`.
///
/// # Errors
///
/// Returns [`CoreError::TenantNotFound`] if `name` has no row in
/// `atomicbase_tenants`, [`CoreError::OutOfSync`] if the tenant's recorded
/// template version no longer matches the template's current version, or a
/// driver error if the tenant's database file cannot be opened.
pub fn connect_tenant(ctx: &CoreContext, name: &str, data_dir: &Path) -> Result<TenantHandle> {
    validate_identifier(name)?;
    let record = lookup_tenant(ctx, name)?;

    let loader = ConnTemplateLoader { conn: &ctx.primary };
    let (schema, current_version) = ctx.schema_cache.get_cached(&loader, record.template_id)?;
    if current_version != record.template_version {
        return Err(CoreError::OutOfSync {
            name: name.to_string(),
            recorded: record.template_version,
            current: current_version,
        });
    }

    let conn = Connection::open(data_dir.join(format!("{name}.db")))?;
    Ok(TenantHandle {
        name: name.to_string(),
        conn,
        schema,
        is_primary: false,
    })
}
