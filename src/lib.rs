//! `atomicbase_core` - multi-tenant JSON-to-SQL query gateway core
//!
//! Compiles a small JSON request DSL into parameterized SQL against
//! SQLite-compatible databases, executes it with lock-contention retry, and
//! resolves which database a request targets (the primary metadata store,
//! template id 0, or one of its tenants). HTTP routing, authentication, and
//! template/tenant management are external collaborators this crate does
//! not provide (see `SPEC_FULL.md`).
//!
//! # Architecture
//!
//! - [`error`] - the crate's single error type and its HTTP-facing detail shape
//! - [`config`] - compile/execute tunables (limits, retry ladder)
//! - [`guard`] - identifier validation and driver-error classification
//! - [`schema`] - the schema snapshot model, its cache, and the metadata store
//! - [`wire`] - request-body decoding into a tagged `Operation`
//! - [`compile`] - filter/select/mutation compilers producing parameterized SQL
//! - [`exec`] - running compiled fragments, with retry and atomic batching
//! - [`tenant`] - primary vs. tenant connection resolution
//! - [`context`] - the process-wide context and the cancellation primitive
//! - [`dispatch`] - the single-operation dispatch entry point
//! - [`logging`] - `tracing` setup for the debug binary

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compile;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod guard;
pub mod logging;
pub mod schema;
pub mod tenant;
pub mod wire;

pub use error::{CoreError, ErrorKind, Result};
