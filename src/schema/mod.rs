//! Schema model & cache (spec.md §4.B).

pub mod cache;
pub mod model;
pub mod store;

pub use cache::{PRIMARY_TEMPLATE_ID, SchemaCache, TemplateLoader};
pub use model::{Column, ColumnType, FkEdge, Schema, Table, tables_to_snapshot};
