//! Metadata store access (spec.md §6): the three internal tables on the
//! primary database, and the [`TemplateLoader`] implementation backed by
//! them.

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::guard::{TEMPLATES_HISTORY_TABLE, TEMPLATES_TABLE, TENANTS_TABLE};
use crate::schema::cache::TemplateLoader;
use crate::schema::model::{Schema, Table, tables_to_snapshot};

/// Create the three metadata tables if they don't already exist.
///
/// # Errors
///
/// Returns an error if any `CREATE TABLE` statement fails.
pub fn ensure_metadata_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS {TENANTS_TABLE} (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            token TEXT NOT NULL,
            template_id INTEGER NOT NULL,
            template_version INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS {TEMPLATES_TABLE} (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            current_version INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS {TEMPLATES_HISTORY_TABLE} (
            id INTEGER PRIMARY KEY,
            template_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            schema BLOB NOT NULL,
            checksum TEXT NOT NULL,
            changes TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(template_id, version)
        );
        "
    ))?;
    Ok(())
}

/// `{"tables": [...]}` wire shape for a schema blob.
#[derive(serde::Serialize, serde::Deserialize)]
struct SchemaBlob {
    tables: Vec<Table>,
}

/// Encode a list of tables into the JSON blob format stored in
/// `atomicbase_templates_history.schema`, and its SHA-256 checksum.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_schema_blob(tables: &[Table]) -> Result<(Vec<u8>, String)> {
    let blob = serde_json::to_vec(&SchemaBlob {
        tables: tables.to_vec(),
    })?;
    let checksum = format!("{:x}", Sha256::digest(&blob));
    Ok((blob, checksum))
}

fn decode_schema_blob(bytes: &[u8]) -> Result<Schema> {
    let blob: SchemaBlob = serde_json::from_slice(bytes)?;
    Ok(tables_to_snapshot(blob.tables))
}

/// Insert a new template and its version-1 history row. Test/seed helper;
/// production template CRUD lives in the (out-of-scope) management surface.
///
/// # Errors
///
/// Returns an error if the insert fails or encoding the schema blob fails.
pub fn seed_template(conn: &Connection, name: &str, tables: &[Table]) -> Result<i64> {
    let (blob, checksum) = encode_schema_blob(tables)?;
    conn.execute(
        &format!("INSERT INTO {TEMPLATES_TABLE} (name, current_version) VALUES (?1, 1)"),
        [name],
    )?;
    let template_id = conn.last_insert_rowid();
    conn.execute(
        &format!(
            "INSERT INTO {TEMPLATES_HISTORY_TABLE} (template_id, version, schema, checksum, changes) \
             VALUES (?1, 1, ?2, ?3, NULL)"
        ),
        rusqlite::params![template_id, blob, checksum],
    )?;
    Ok(template_id)
}

/// Loads templates from the primary connection's metadata tables.
pub struct ConnTemplateLoader<'a> {
    pub conn: &'a Connection,
}

impl TemplateLoader for ConnTemplateLoader<'_> {
    fn load_current(&self, template_id: i64) -> Result<(i64, Schema)> {
        let current_version: i64 = self
            .conn
            .query_row(
                &format!("SELECT current_version FROM {TEMPLATES_TABLE} WHERE id = ?1"),
                [template_id],
                |row| row.get(0),
            )
            .map_err(|_| CoreError::TemplateVersionNotFound {
                template_id,
                version: -1,
            })?;

        let blob: Vec<u8> = self
            .conn
            .query_row(
                &format!(
                    "SELECT schema FROM {TEMPLATES_HISTORY_TABLE} \
                     WHERE template_id = ?1 AND version = ?2"
                ),
                rusqlite::params![template_id, current_version],
                |row| row.get(0),
            )
            .map_err(|_| CoreError::TemplateVersionNotFound {
                template_id,
                version: current_version,
            })?;

        Ok((current_version, decode_schema_blob(&blob)?))
    }

    fn all_template_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {TEMPLATES_TABLE}"))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Column, ColumnType};
    use std::collections::BTreeMap;

    fn users_table() -> Table {
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
        Table {
            name: "users".to_string(),
            pk: vec!["id".to_string()],
            columns,
            indexes: vec![],
            fts_columns: vec![],
        }
    }

    #[test]
    fn seed_and_load_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_metadata_tables(&conn).unwrap();
        let template_id = seed_template(&conn, "blog", &[users_table()]).unwrap();

        let loader = ConnTemplateLoader { conn: &conn };
        let (version, schema) = loader.load_current(template_id).unwrap();
        assert_eq!(version, 1);
        assert!(schema.search_table("users").is_some());
    }

    #[test]
    fn missing_template_is_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_metadata_tables(&conn).unwrap();
        let loader = ConnTemplateLoader { conn: &conn };
        assert!(loader.load_current(999).is_err());
    }

    #[test]
    fn checksum_is_stable_for_same_input() {
        let (_, c1) = encode_schema_blob(&[users_table()]).unwrap();
        let (_, c2) = encode_schema_blob(&[users_table()]).unwrap();
        assert_eq!(c1, c2);
    }
}
