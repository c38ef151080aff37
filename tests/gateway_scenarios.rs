//! End-to-end scenarios from spec.md §8, run against an in-memory SQLite
//! connection through the full compile -> execute -> dispatch path.

mod common;

use atomicbase_core::context::CancellationToken;
use atomicbase_core::dispatch::dispatch_query;
use atomicbase_core::schema::model::{ColumnType, Table, tables_to_snapshot};
use atomicbase_core::wire::{Operation, decode_delete, decode_insert, decode_select, decode_update};
use rusqlite::Connection;
use serde_json::json;

/// Scenario 1 - simple filter.
#[test]
fn simple_filter_matches_by_id() {
    let conn = common::open_users_and_posts();
    conn.execute_batch(
        "INSERT INTO users (id, name, age) VALUES (5, 'Ada', 30), (6, 'Bo', 40);",
    )
    .unwrap();
    let ctx = common::context(conn);
    let schema = common::users_and_posts_schema();
    let cancel = CancellationToken::new();

    let req = decode_select(&json!({
        "select": ["id", "name"],
        "where": [{"id": {"eq": 5}}]
    }))
    .unwrap();
    let result = dispatch_query(&ctx, &schema, true, "users", &Operation::Select(req), &cancel).unwrap();

    assert_eq!(result, json!([{"id": 5, "name": "Ada"}]));
}

/// Scenario 2 - empty `in` is rejected before any SQL reaches the driver.
#[test]
fn empty_in_array_rejected_before_execution() {
    let conn = common::open_users_and_posts();
    let ctx = common::context(conn);
    let schema = common::users_and_posts_schema();
    let cancel = CancellationToken::new();

    let req = decode_select(&json!({
        "select": ["id"],
        "where": [{"id": {"in": []}}]
    }))
    .unwrap();
    let err = dispatch_query(&ctx, &schema, true, "users", &Operation::Select(req), &cancel).unwrap_err();
    assert!(matches!(err, atomicbase_core::CoreError::EmptyInArray { .. }));
}

/// Scenario 3 - nested FK join, one user with posts and one without.
#[test]
fn nested_relation_aggregates_child_rows() {
    let conn = common::open_users_and_posts();
    conn.execute_batch(
        "INSERT INTO users (id, name, age) VALUES (1, 'Ada', 30), (3, 'Cy', 50);
         INSERT INTO posts (id, user_id, title) VALUES (10, 1, 'a'), (11, 1, 'b');",
    )
    .unwrap();
    let ctx = common::context(conn);
    let schema = common::users_and_posts_schema();
    let cancel = CancellationToken::new();

    let req = decode_select(&json!({
        "select": ["id", {"posts": ["title"]}],
        "order": {"id": "asc"}
    }))
    .unwrap();
    let result = dispatch_query(&ctx, &schema, true, "users", &Operation::Select(req), &cancel).unwrap();

    assert_eq!(
        result,
        json!([
            {"id": 1, "posts": [{"title": "a"}, {"title": "b"}]},
            {"id": 3, "posts": []},
        ])
    );
}

/// Scenario 4 - composite-PK upsert, then a second upsert missing half the
/// key fails identifier/column validation rather than silently succeeding.
#[test]
fn composite_pk_upsert_conflicts_on_full_key() {
    let conn = common::open_user_roles();
    let ctx = common::context(conn);
    let schema = common::user_roles_schema();
    let cancel = CancellationToken::new();

    let req = decode_insert(&json!({
        "data": {"user_id": 1, "role_id": 2, "granted_at": "2026-01-01"}
    }))
    .unwrap();
    let result = dispatch_query(&ctx, &schema, true, "user_roles", &Operation::Upsert(req), &cancel).unwrap();
    assert!(result.is_null());

    let req_again = decode_insert(&json!({
        "data": {"user_id": 1, "role_id": 2, "granted_at": "2026-02-02"}
    }))
    .unwrap();
    let result_again =
        dispatch_query(&ctx, &schema, true, "user_roles", &Operation::Upsert(req_again), &cancel).unwrap();
    assert!(result_again.is_null());

    let count: i64 = ctx
        .primary
        .query_row("SELECT COUNT(*) FROM user_roles", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

/// Two levels of nesting: a subquery's JSON result, embedded as a value in
/// its parent's own `json_object` call, must come through as real JSON and
/// not a re-escaped string (SQLite's JSON1 functions lose the "this is
/// already JSON" subtype across a subquery boundary unless re-wrapped).
#[test]
fn two_level_nesting_embeds_raw_json_not_escaped_text() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), title TEXT);
         CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER REFERENCES posts(id), body TEXT);
         INSERT INTO users VALUES (1, 'Ada');
         INSERT INTO posts VALUES (10, 1, 'hello');
         INSERT INTO comments VALUES (100, 10, 'nice post');",
    )
    .unwrap();

    let mut user_cols = std::collections::BTreeMap::new();
    user_cols.insert("id".to_string(), common::column(ColumnType::Integer));
    user_cols.insert("name".to_string(), common::column(ColumnType::Text));
    let users = Table {
        name: "users".to_string(),
        pk: vec!["id".to_string()],
        columns: user_cols,
        indexes: vec![],
        fts_columns: vec![],
    };

    let mut post_cols = std::collections::BTreeMap::new();
    post_cols.insert("id".to_string(), common::column(ColumnType::Integer));
    post_cols.insert("user_id".to_string(), common::fk_column(ColumnType::Integer, "users.id"));
    post_cols.insert("title".to_string(), common::column(ColumnType::Text));
    let posts = Table {
        name: "posts".to_string(),
        pk: vec!["id".to_string()],
        columns: post_cols,
        indexes: vec![],
        fts_columns: vec![],
    };

    let mut comment_cols = std::collections::BTreeMap::new();
    comment_cols.insert("id".to_string(), common::column(ColumnType::Integer));
    comment_cols.insert("post_id".to_string(), common::fk_column(ColumnType::Integer, "posts.id"));
    comment_cols.insert("body".to_string(), common::column(ColumnType::Text));
    let comments = Table {
        name: "comments".to_string(),
        pk: vec!["id".to_string()],
        columns: comment_cols,
        indexes: vec![],
        fts_columns: vec![],
    };

    let schema = tables_to_snapshot(vec![users, posts, comments]);
    let ctx = common::context(conn);
    let cancel = CancellationToken::new();

    let req = decode_select(&json!({
        "select": ["id", {"posts": ["title", {"comments": ["body"]}]}]
    }))
    .unwrap();
    let result = dispatch_query(&ctx, &schema, true, "users", &Operation::Select(req), &cancel).unwrap();

    assert_eq!(
        result,
        json!([{
            "id": 1,
            "posts": [{"title": "hello", "comments": [{"body": "nice post"}]}],
        }])
    );
}

#[test]
fn update_and_delete_require_non_empty_where() {
    let body = json!({"data": {"name": "x"}});
    assert!(decode_update(&body, "users").is_err());
    assert!(decode_delete(&json!({}), "users").is_err());
}
