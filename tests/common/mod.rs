//! Shared fixtures for the end-to-end scenario tests (spec.md §8).
//!
//! Not every fixture here is used by every test binary that includes this
//! module (each `tests/*.rs` file compiles it separately).
#![allow(dead_code)]

use std::collections::BTreeMap;

use atomicbase_core::config::CoreConfig;
use atomicbase_core::context::CoreContext;
use atomicbase_core::schema::model::{Column, ColumnType, Schema, Table, tables_to_snapshot};
use rusqlite::Connection;

pub fn column(data_type: ColumnType) -> Column {
    Column {
        data_type,
        constraints: vec![],
        default: None,
        references: None,
    }
}

pub fn fk_column(data_type: ColumnType, references: &str) -> Column {
    Column {
        data_type,
        constraints: vec![],
        default: None,
        references: Some(references.to_string()),
    }
}

/// `users(id INTEGER PK, name TEXT, age INTEGER)` and `posts(id INTEGER PK,
/// user_id -> users.id, title TEXT)`, matching spec.md §8 scenarios 1 and 3.
pub fn users_and_posts_schema() -> Schema {
    let mut user_cols = BTreeMap::new();
    user_cols.insert("id".to_string(), column(ColumnType::Integer));
    user_cols.insert("name".to_string(), column(ColumnType::Text));
    user_cols.insert("age".to_string(), column(ColumnType::Integer));
    let users = Table {
        name: "users".to_string(),
        pk: vec!["id".to_string()],
        columns: user_cols,
        indexes: vec![],
        fts_columns: vec![],
    };

    let mut post_cols = BTreeMap::new();
    post_cols.insert("id".to_string(), column(ColumnType::Integer));
    post_cols.insert(
        "user_id".to_string(),
        fk_column(ColumnType::Integer, "users.id"),
    );
    post_cols.insert("title".to_string(), column(ColumnType::Text));
    let posts = Table {
        name: "posts".to_string(),
        pk: vec!["id".to_string()],
        columns: post_cols,
        indexes: vec![],
        fts_columns: vec![],
    };

    tables_to_snapshot(vec![users, posts])
}

/// `user_roles(user_id, role_id, granted_at, PK(user_id, role_id))`, for the
/// composite-PK upsert scenario (spec.md §8 scenario 4).
pub fn user_roles_schema() -> Schema {
    let mut cols = BTreeMap::new();
    cols.insert("user_id".to_string(), column(ColumnType::Integer));
    cols.insert("role_id".to_string(), column(ColumnType::Integer));
    cols.insert("granted_at".to_string(), column(ColumnType::Text));
    let table = Table {
        name: "user_roles".to_string(),
        pk: vec!["user_id".to_string(), "role_id".to_string()],
        columns: cols,
        indexes: vec![],
        fts_columns: vec![],
    };
    tables_to_snapshot(vec![table])
}

pub fn open_users_and_posts() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
         CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), title TEXT);",
    )
    .unwrap();
    conn
}

pub fn open_user_roles() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE user_roles (
            user_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            granted_at TEXT,
            PRIMARY KEY (user_id, role_id)
        );",
    )
    .unwrap();
    conn
}

pub fn context(conn: Connection) -> CoreContext {
    CoreContext::new(conn, CoreConfig::default())
}
