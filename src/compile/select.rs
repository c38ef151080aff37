//! Select compiler (spec.md §4.D): implicit FK-joined nested selects and
//! custom/explicit joins, both producing a flat parameterized [`Fragment`].

use rusqlite::types::Value as SqlValue;

use crate::compile::filter::{require_column, require_table};
use crate::compile::relation::{RelationArena, build_tree};
use crate::compile::{Fragment, filter};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::guard::{quote_ident, sanitize_json_key, validate_identifier};
use crate::schema::{ColumnType, Schema, Table};
use crate::wire::{JoinClause, JoinType, OrderDir, SelectItem, SelectRequest};

/// Columns to project for a node: `*` (or no explicit request) expands to
/// every non-BLOB column, in schema order; an explicit list is taken as-is
/// minus any BLOB columns (spec.md §4.D, BLOB exclusion invariant).
pub(crate) fn resolve_columns(table: &Table, requested: &[String]) -> Vec<String> {
    let wants_all = requested.is_empty() || requested.iter().any(|c| c == "*");
    if wants_all {
        table
            .columns
            .iter()
            .filter(|(_, col)| col.data_type != ColumnType::Blob)
            .map(|(name, _)| name.clone())
            .collect()
    } else {
        requested
            .iter()
            .filter(|name| {
                table
                    .columns
                    .get(name.as_str())
                    .is_some_and(|col| col.data_type != ColumnType::Blob)
            })
            .cloned()
            .collect()
    }
}

/// `json_object('k1', e1, 'k2', e2, ...)`, chunked into `json_patch`-folded
/// calls once the pair count exceeds `max_pairs` (spec.md §4.D.1).
fn build_json_object_expr(pairs: &[(String, String)], max_pairs: usize) -> Result<String> {
    if pairs.is_empty() {
        return Ok("json_object()".to_string());
    }
    let max_pairs = max_pairs.max(1);
    let mut exprs = pairs.chunks(max_pairs).map(|chunk| {
        let args = chunk
            .iter()
            .map(|(key, expr)| format!("'{key}', {expr}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("json_object({args})")
    });
    let mut acc = exprs.next().expect("pairs is non-empty");
    for next in exprs {
        acc = format!("json_patch({acc}, {next})");
    }
    Ok(acc)
}

fn node_json_pairs(
    arena: &RelationArena,
    idx: usize,
    schema: &Schema,
    config: &CoreConfig,
) -> Result<Vec<(String, String)>> {
    let node = arena.node(idx);
    let table = require_table(schema, &node.table)?;
    let mut pairs = Vec::new();
    for col in resolve_columns(table, &node.columns) {
        let key = sanitize_json_key(&col)?;
        let expr = format!("{}.{}", quote_ident(&node.table), quote_ident(&col));
        pairs.push((key, expr));
    }
    for &child_idx in &node.children {
        let child = arena.node(child_idx);
        let key = sanitize_json_key(&child.table)?;
        // A subquery's result loses its JSON subtype the moment it's read
        // as a value (SQLite json1 docs); wrapping in `json(...)` here
        // re-marks it so the enclosing `json_object` embeds it raw instead
        // of re-quoting it as a string.
        let expr = format!("json({})", build_subquery(arena, child_idx, schema, config)?);
        pairs.push((key, expr));
    }
    Ok(pairs)
}

/// The condition joining a non-root node to its parent: `[node].[from] =
/// [parent].[to]`, since the node's own FK column always references the
/// parent (spec.md §4.D.1 `searchFk(C.name, R.name)`, no reverse direction).
fn child_join_condition(arena: &RelationArena, idx: usize) -> String {
    let node = arena.node(idx);
    let parent_idx = node.parent.expect("non-root node has a parent");
    let parent = arena.node(parent_idx);
    let edge = node.edge.as_ref().expect("non-root node has an edge");
    format!(
        "{}.{} = {}.{}",
        quote_ident(&node.table),
        quote_ident(&edge.from),
        quote_ident(&parent.table),
        quote_ident(&edge.to)
    )
}

/// `EXISTS (SELECT 1 FROM [node] WHERE <join condition>)`: dropped into the
/// parent's own filter when `node.inner` is set, so a parent row with no
/// matching row here is excluded instead of kept with an empty child array.
fn exists_condition(arena: &RelationArena, idx: usize) -> String {
    let node = arena.node(idx);
    format!(
        "EXISTS (SELECT 1 FROM {} WHERE {})",
        quote_ident(&node.table),
        child_join_condition(arena, idx)
    )
}

/// The correlated `(SELECT json_group_array(json_object(...)) FROM [table]
/// WHERE ...)` expression for a non-root node.
fn build_subquery(
    arena: &RelationArena,
    idx: usize,
    schema: &Schema,
    config: &CoreConfig,
) -> Result<String> {
    let node = arena.node(idx);
    let table_ident = quote_ident(&node.table);
    let mut where_sql = child_join_condition(arena, idx);
    for &grandchild_idx in &node.children {
        if arena.node(grandchild_idx).inner {
            where_sql.push_str(" AND ");
            where_sql.push_str(&exists_condition(arena, grandchild_idx));
        }
    }

    let pairs = node_json_pairs(arena, idx, schema, config)?;
    let obj_expr = build_json_object_expr(&pairs, config.max_select_columns)?;
    let agg_expr = format!("json_group_array({obj_expr})");

    Ok(format!("(SELECT {agg_expr} FROM {table_ident} WHERE {where_sql})"))
}

fn build_order_clause(table: &str, root: &Table, order: &[(String, OrderDir)]) -> Result<String> {
    if order.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(order.len());
    for (col, dir) in order {
        require_column(root, table, col)?;
        let dir_sql = match dir {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        };
        parts.push(format!("{}.{} {}", quote_ident(table), quote_ident(col), dir_sql));
    }
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

fn resolve_limit_offset(config: &CoreConfig, limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let mut limit = limit.unwrap_or(config.default_limit);
    if config.max_limit > 0 {
        limit = limit.min(config.max_limit);
    }
    (limit, offset.unwrap_or(0))
}

/// Compile a select request rooted at `table`.
///
/// # Errors
///
/// Returns a validation error for an unknown table/column, a relation depth
/// over `config.max_query_depth`, a nested relation with no FK edge to its
/// parent, or any filter error (see [`filter::compile_filters`]).
pub fn compile_select(
    table: &str,
    schema: &Schema,
    request: &SelectRequest,
    config: &CoreConfig,
) -> Result<Fragment> {
    let root = require_table(schema, table)?;

    if !request.join.is_empty() {
        return compile_custom_join(table, root, schema, request, config);
    }

    let arena = build_tree(table, schema, &request.select, config.max_query_depth)?;
    let root_node = arena.root();

    let mut select_parts = Vec::new();
    for col in resolve_columns(root, &root_node.columns) {
        select_parts.push(format!(
            "{}.{} AS {}",
            quote_ident(table),
            quote_ident(&col),
            quote_ident(&col)
        ));
    }
    let mut json_columns = Vec::new();
    let mut inner_conditions = Vec::new();
    for &child_idx in &root_node.children {
        let child = arena.node(child_idx);
        let subquery = build_subquery(&arena, child_idx, schema, config)?;
        select_parts.push(format!("{subquery} AS {}", quote_ident(&child.table)));
        json_columns.push(child.table.clone());
        if child.inner {
            inner_conditions.push(exists_condition(&arena, child_idx));
        }
    }

    let mut sql = format!("SELECT {} FROM {}", select_parts.join(", "), quote_ident(table));

    let where_frag = filter::compile_filters(table, schema, &request.filters, config)?;
    let mut args = where_frag.args;
    let mut conditions: Vec<String> = where_frag
        .sql
        .strip_prefix("WHERE ")
        .map(str::to_string)
        .into_iter()
        .collect();
    conditions.extend(inner_conditions);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(&build_order_clause(table, root, &request.order)?);

    let (limit, offset) = resolve_limit_offset(config, request.limit, request.offset);
    sql.push_str(" LIMIT ? OFFSET ?");
    args.push(SqlValue::Integer(limit));
    args.push(SqlValue::Integer(offset));

    Ok(Fragment::new(sql, args).with_json_columns(json_columns))
}

fn qualify_join_side(raw: &str, root_table: &str, join_table: &str, join_alias: &str) -> Result<String> {
    let Some((t, c)) = raw.split_once('.') else {
        return Err(CoreError::MalformedFilter {
            reason: format!("join condition side {raw:?} must be `table.column`"),
        });
    };
    validate_identifier(c)?;
    if t == root_table || t == join_table || t == join_alias {
        Ok(format!("{}.{}", quote_ident(t), quote_ident(c)))
    } else {
        Err(CoreError::UnknownTable { table: t.to_string() })
    }
}

/// One explicit join clause resolved against the schema: its alias, the
/// real table it projects columns from, the emitted `{LEFT|INNER} JOIN`
/// text, and the qualified left side of its first `on` condition (used as
/// the `flat = false` FILTER anchor, spec.md §4.D.2).
struct ResolvedJoin<'a> {
    alias: String,
    table: &'a Table,
    join_sql: String,
    first_left: String,
    flat: bool,
}

fn resolve_join<'a>(
    table: &str,
    schema: &'a Schema,
    join: &JoinClause,
) -> Result<ResolvedJoin<'a>> {
    let alias = join.alias.clone().unwrap_or_else(|| join.table.clone());
    validate_identifier(&alias)?;
    let join_table = require_table(schema, &join.table)?;
    let join_kw = match join.join_type {
        JoinType::Inner => "INNER JOIN",
        JoinType::Left => "LEFT JOIN",
    };
    let mut conds = Vec::with_capacity(join.on.len());
    let mut first_left = None;
    for cond in &join.on {
        if cond.op != "eq" {
            return Err(CoreError::UnknownOperator { op: cond.op.clone() });
        }
        let left = qualify_join_side(&cond.left, table, &join.table, &alias)?;
        let right = qualify_join_side(&cond.right, table, &join.table, &alias)?;
        if first_left.is_none() {
            first_left = Some(left.clone());
        }
        conds.push(format!("{left} = {right}"));
    }
    let first_left = first_left.ok_or_else(|| CoreError::MalformedFilter {
        reason: "join clause must have at least one `on` condition".to_string(),
    })?;
    let table_sql = if let Some(join_alias) = &join.alias {
        format!("{} AS {}", quote_ident(&join.table), quote_ident(join_alias))
    } else {
        quote_ident(&join.table)
    };
    let join_sql = format!(" {join_kw} {table_sql} ON {}", conds.join(" AND "));

    Ok(ResolvedJoin {
        alias,
        table: join_table,
        join_sql,
        first_left,
        flat: join.flat,
    })
}

/// Explicit/custom joins (spec.md §4.D.2): each join's select columns route
/// either into the base table's flat projection, or (per the join's `flat`
/// flag) into a prefixed flat projection or a re-aggregated nested array
/// that collapses the join's row fan-out back to one row per base row.
fn compile_custom_join(
    table: &str,
    root: &Table,
    schema: &Schema,
    request: &SelectRequest,
    config: &CoreConfig,
) -> Result<Fragment> {
    let joins = request
        .join
        .iter()
        .map(|join| resolve_join(table, schema, join))
        .collect::<Result<Vec<_>>>()?;

    let mut base_columns: Vec<String> = Vec::new();
    let mut join_columns: Vec<Vec<String>> = vec![Vec::new(); joins.len()];

    for item in &request.select {
        let SelectItem::Column(col) = item else {
            return Err(CoreError::MalformedFilter {
                reason: "nested select entries are not supported alongside an explicit `join`"
                    .to_string(),
            });
        };
        if col == "*" {
            base_columns.extend(resolve_columns(root, &[]));
            continue;
        }
        if let Some((t, c)) = col.split_once('.') {
            if t == table {
                require_column(root, table, c)?;
                base_columns.push(c.to_string());
                continue;
            }
            if let Some(pos) = joins.iter().position(|j| j.alias == t) {
                if c == "*" {
                    join_columns[pos].extend(resolve_columns(joins[pos].table, &[]));
                } else {
                    require_column(joins[pos].table, t, c)?;
                    join_columns[pos].push(c.to_string());
                }
                continue;
            }
            return Err(CoreError::UnknownTable { table: t.to_string() });
        }
        require_column(root, table, col)?;
        base_columns.push(col.clone());
    }

    let mut select_parts = Vec::new();
    for col in &base_columns {
        select_parts.push(format!(
            "{}.{} AS {}",
            quote_ident(table),
            quote_ident(col),
            quote_ident(col)
        ));
    }

    let mut json_columns = Vec::new();
    let mut needs_group_by = false;
    for (join, cols) in joins.iter().zip(&join_columns) {
        if cols.is_empty() {
            continue;
        }
        if join.flat {
            for col in cols {
                select_parts.push(format!(
                    "{}.{} AS {}",
                    quote_ident(&join.alias),
                    quote_ident(col),
                    quote_ident(&format!("{}_{col}", join.alias))
                ));
            }
        } else {
            let pairs = cols
                .iter()
                .map(|col| {
                    Ok((
                        sanitize_json_key(col)?,
                        format!("{}.{}", quote_ident(&join.alias), quote_ident(col)),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let obj_expr = build_json_object_expr(&pairs, config.max_select_columns)?;
            select_parts.push(format!(
                "json_group_array({obj_expr}) FILTER (WHERE {} IS NOT NULL) AS {}",
                join.first_left,
                quote_ident(&join.alias)
            ));
            json_columns.push(join.alias.clone());
            needs_group_by = true;
        }
    }

    let mut sql = format!("SELECT {} FROM {}", select_parts.join(", "), quote_ident(table));
    for join in &joins {
        sql.push_str(&join.join_sql);
    }

    let where_frag = filter::compile_filters(table, schema, &request.filters, config)?;
    let mut args = where_frag.args;
    if !where_frag.sql.is_empty() {
        sql.push(' ');
        sql.push_str(&where_frag.sql);
    }

    if needs_group_by {
        sql.push_str(&build_group_by_clause(table, root, &base_columns));
    }

    sql.push_str(&build_order_clause(table, root, &request.order)?);

    let (limit, offset) = resolve_limit_offset(config, request.limit, request.offset);
    sql.push_str(" LIMIT ? OFFSET ?");
    args.push(SqlValue::Integer(limit));
    args.push(SqlValue::Integer(offset));

    Ok(Fragment::new(sql, args).with_json_columns(json_columns))
}

/// `GROUP BY` on every base-projected column plus the base table's PK (or
/// `rowid` if it has none), so a `flat = false` join's row fan-out
/// collapses back to one row per base row (spec.md §4.D.1/§4.D.2).
fn build_group_by_clause(table: &str, root: &Table, base_columns: &[String]) -> String {
    let mut cols: Vec<&str> = base_columns.iter().map(String::as_str).collect();
    if root.pk.is_empty() {
        cols.push("rowid");
    } else {
        for pk in &root.pk {
            if !cols.contains(&pk.as_str()) {
                cols.push(pk);
            }
        }
    }
    let parts: Vec<String> = cols
        .iter()
        .map(|c| format!("{}.{}", quote_ident(table), quote_ident(c)))
        .collect();
    format!(" GROUP BY {}", parts.join(", "))
}
