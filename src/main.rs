//! `atomicbase-coreutil` - a debug front-end for the query gateway core.
//!
//! Not a product CLI surface: opens a primary database, ensures its
//! metadata tables exist, dispatches one request read from a JSON file
//! against a named table, and prints the JSON result. Useful for exercising
//! the compiler/executor by hand without standing up the (out-of-scope)
//! HTTP collaborator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use atomicbase_core::config::CoreConfig;
use atomicbase_core::context::{CancellationToken, CoreContext};
use atomicbase_core::dispatch::dispatch_query;
use atomicbase_core::logging::init_logging;
use atomicbase_core::schema::store::ensure_metadata_tables;
use atomicbase_core::tenant::connect_primary;
use atomicbase_core::wire::{Operation, decode_delete, decode_insert, decode_select, decode_update};
use clap::Parser;
use rusqlite::Connection;

/// Compile, execute, and print the result of one request against a primary database.
#[derive(Parser, Debug)]
#[command(name = "atomicbase-coreutil", version, about)]
struct Cli {
    /// Path to the primary SQLite database file.
    #[arg(long)]
    db: PathBuf,

    /// Table the request targets.
    #[arg(long)]
    table: String,

    /// One of: select, insert, insert-ignore, upsert, update, delete.
    #[arg(long)]
    operation: String,

    /// Path to a JSON file holding the request body.
    #[arg(long)]
    body: PathBuf,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write JSON logs to this file in addition to stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_operation(kind: &str, body: &serde_json::Value, table: &str) -> Result<Operation> {
    let op = match kind {
        "select" => Operation::Select(decode_select(body)?),
        "insert" => Operation::Insert(decode_insert(body)?),
        "insert-ignore" => Operation::InsertIgnore(decode_insert(body)?),
        "upsert" => Operation::Upsert(decode_insert(body)?),
        "update" => Operation::Update(decode_update(body, table)?),
        "delete" => Operation::Delete(decode_delete(body, table)?),
        other => anyhow::bail!("unknown operation {other:?}"),
    };
    Ok(op)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let conn = Connection::open(&cli.db)
        .with_context(|| format!("opening primary database at {}", cli.db.display()))?;
    ensure_metadata_tables(&conn)?;

    let ctx = CoreContext::new(conn, CoreConfig::from_env());
    let schema = connect_primary(&ctx)?;

    let body_text = std::fs::read_to_string(&cli.body)
        .with_context(|| format!("reading request body from {}", cli.body.display()))?;
    let body: serde_json::Value = serde_json::from_str(&body_text)?;

    let operation = parse_operation(&cli.operation, &body, &cli.table)?;
    let cancel = CancellationToken::new();

    let result = dispatch_query(&ctx, &schema, true, &cli.table, &operation, &cancel)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
