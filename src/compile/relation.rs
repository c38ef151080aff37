//! Arena-based relation tree for the nested-select compiler (spec.md §4.D.1).
//!
//! Parent/child edges are plain indices into a single `Vec`, not shared
//! pointers: the tree is built once per compile call and discarded with it,
//! so there is nothing here that needs to outlive the compile.

use crate::error::{CoreError, Result};
use crate::schema::{FkEdge, Schema};
use crate::wire::SelectItem;

/// One node in the relation tree: one table occurrence in the select.
#[derive(Debug, Clone)]
pub struct RelationNode {
    pub table: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
    /// Plain columns requested directly on this node (already filtered of
    /// nested entries, which become `children` instead).
    pub columns: Vec<String>,
    /// `None` only for the root.
    pub edge: Option<FkEdge>,
    /// Whether this relation was requested with `"type": "inner"`: when
    /// true, a parent row with no matching row here is dropped rather than
    /// kept with an empty/null child. Meaningless for the root.
    pub inner: bool,
}

/// An arena of relation nodes rooted at index 0.
#[derive(Debug, Clone, Default)]
pub struct RelationArena {
    nodes: Vec<RelationNode>,
}

impl RelationArena {
    #[must_use]
    pub fn root(&self) -> &RelationNode {
        &self.nodes[0]
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> &RelationNode {
        &self.nodes[idx]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &RelationNode)> {
        self.nodes.iter().enumerate()
    }

    fn push(&mut self, node: RelationNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

/// Resolve the FK edge from `child_table` to `parent_table`: the child must
/// hold the referencing column (spec.md §4.D.1 `searchFk(C.name, R.name)`).
/// No reverse-direction fallback — a schema where only the parent holds a
/// column referencing the child is not a valid relationship here.
fn resolve_edge(schema: &Schema, parent_table: &str, child_table: &str) -> Result<FkEdge> {
    schema
        .search_fk(child_table, parent_table)
        .cloned()
        .ok_or_else(|| CoreError::NoRelationship {
            from: child_table.to_string(),
            to: parent_table.to_string(),
        })
}

/// Build the relation tree for an implicit-join select rooted at `table`,
/// recursing into nested [`SelectItem::Nested`] entries.
///
/// # Errors
///
/// Returns [`CoreError::DepthExceeded`] if nesting exceeds
/// `config.max_query_depth`, or [`CoreError::NoRelationship`] if a nested
/// table has no FK edge (in either direction) to its parent.
pub fn build_tree(
    table: &str,
    schema: &Schema,
    select: &[SelectItem],
    max_depth: usize,
) -> Result<RelationArena> {
    let mut arena = RelationArena::default();
    let root_idx = arena.push(RelationNode {
        table: table.to_string(),
        parent: None,
        children: Vec::new(),
        depth: 0,
        columns: Vec::new(),
        edge: None,
        inner: false,
    });
    attach_children(&mut arena, root_idx, schema, select, max_depth)?;
    Ok(arena)
}

fn attach_children(
    arena: &mut RelationArena,
    parent_idx: usize,
    schema: &Schema,
    select: &[SelectItem],
    max_depth: usize,
) -> Result<()> {
    for item in select {
        match item {
            SelectItem::Column(name) => {
                arena.nodes[parent_idx].columns.push(name.clone());
            }
            SelectItem::Nested {
                table: child_table,
                columns,
                inner,
            } => {
                let parent_table = arena.nodes[parent_idx].table.clone();
                let depth = arena.nodes[parent_idx].depth + 1;
                if depth > max_depth {
                    return Err(CoreError::DepthExceeded {
                        depth,
                        max: max_depth,
                    });
                }
                let edge = resolve_edge(schema, &parent_table, child_table)?;
                let child_idx = arena.push(RelationNode {
                    table: child_table.clone(),
                    parent: Some(parent_idx),
                    children: Vec::new(),
                    depth,
                    columns: Vec::new(),
                    edge: Some(edge),
                    inner: *inner,
                });
                arena.nodes[parent_idx].children.push(child_idx);
                attach_children(arena, child_idx, schema, columns, max_depth)?;
            }
        }
    }
    Ok(())
}
