//! Schema snapshot model (spec.md §3, §4.B).
//!
//! A [`Schema`] is an immutable value describing every user-visible table,
//! column, index, FK edge, and FTS-enabled table for one template at one
//! version. Once published into the cache it is never mutated; readers only
//! ever see a complete, coherent snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// SQLite storage class, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    #[serde(rename = "type")]
    pub data_type: ColumnType,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub default: Option<String>,
    /// Raw `"table.column"` reference, as stored in the schema blob; parsed
    /// lazily by [`tables_to_snapshot`] when deriving FK edges.
    #[serde(default)]
    pub references: Option<String>,
}

/// A single table definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub pk: Vec<String>,
    pub columns: BTreeMap<String, Column>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub fts_columns: Vec<String>,
}

/// A foreign-key edge, directional: `(from -> to)` is distinct from
/// `(to -> from)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FkEdge {
    /// Source table (the table that holds the referencing column).
    pub table: String,
    /// Target table (the table being referenced).
    pub references: String,
    /// Column on `table` holding the reference.
    pub from: String,
    /// Column on `references` being referenced.
    pub to: String,
}

/// An immutable schema snapshot for one template at one version.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
    /// Outgoing FK edges keyed by source table name, in column-declaration order.
    fk_edges: BTreeMap<String, Vec<FkEdge>>,
    fts_tables: std::collections::BTreeSet<String>,
}

impl Schema {
    /// Look up a table by name.
    #[must_use]
    pub fn search_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// All tables in the snapshot, in name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Look up a column on a table.
    #[must_use]
    pub fn search_column<'a>(&self, table: &'a Table, name: &'a str) -> Option<(&'a str, &'a Column)> {
        table.columns.get(name).map(move |col| (name, col))
    }

    /// Find the FK edge from `from_table` to `to_table`, if one exists.
    /// Asymmetric: `(posts -> users)` is distinct from `(users -> posts)`.
    #[must_use]
    pub fn search_fk(&self, from_table: &str, to_table: &str) -> Option<&FkEdge> {
        self.fk_edges
            .get(from_table)?
            .iter()
            .find(|edge| edge.references == to_table)
    }

    /// Whether `table` is backed by an FTS5 virtual table named
    /// `{table}_fts`.
    #[must_use]
    pub fn has_fts(&self, table: &str) -> bool {
        self.fts_tables.contains(table)
    }

    /// FTS5 shadow table name for `table`.
    #[must_use]
    pub fn fts_table_name(table: &str) -> String {
        format!("{table}_fts")
    }
}

/// Derive a schema snapshot from an ordered sequence of table definitions.
///
/// FK edges are derived purely from each column's `references` field
/// (format `"table.column"`); references that contain no dot are silently
/// skipped (malformed, per spec.md §4.B). Deterministic: running this twice
/// on the same input yields equal FK edges (as sets) and an equal tables
/// mapping (spec.md §8, idempotence invariant).
#[must_use]
pub fn tables_to_snapshot(tables: Vec<Table>) -> Schema {
    let mut map = BTreeMap::new();
    let mut fk_edges: BTreeMap<String, Vec<FkEdge>> = BTreeMap::new();
    let mut fts_tables = std::collections::BTreeSet::new();

    for table in tables {
        if !table.fts_columns.is_empty() {
            fts_tables.insert(table.name.clone());
        }

        for (col_name, col) in &table.columns {
            let Some(reference) = &col.references else {
                continue;
            };
            let Some((ref_table, ref_col)) = reference.split_once('.') else {
                continue;
            };
            fk_edges
                .entry(table.name.clone())
                .or_default()
                .push(FkEdge {
                    table: table.name.clone(),
                    references: ref_table.to_string(),
                    from: col_name.clone(),
                    to: ref_col.to_string(),
                });
        }

        map.insert(table.name.clone(), table);
    }

    Schema {
        tables: map,
        fk_edges,
        fts_tables,
    }
}
