//! Logging configuration and initialization.
//!
//! Uses tracing with environment-based filtering and optional JSON file
//! output. The library itself never installs a global subscriber (library
//! crates must not); these helpers are for the debug binary and tests.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Mutex, Once};

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize logging for the debug binary.
///
/// Logging honors `RUST_LOG` if set; otherwise a default filter is used based
/// on verbosity.
///
/// # Errors
///
/// Returns an error if logging initialization fails.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbosity)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_ansi(std::io::stderr().is_terminal());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(path) = log_file {
        let file = std::fs::File::create(path)?;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .json();
        tracing::subscriber::set_global_default(subscriber.with(file_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

fn default_filter(verbosity: u8) -> String {
    match verbosity {
        0 => {
            if cfg!(debug_assertions) {
                "atomicbase_core=debug".to_string()
            } else {
                "atomicbase_core=info".to_string()
            }
        }
        1 => "atomicbase_core=debug".to_string(),
        2 => "atomicbase_core=debug,rusqlite=debug".to_string(),
        _ => "atomicbase_core=trace".to_string(),
    }
}

/// Initialize logging for tests with the test writer. Safe to call many
/// times; only the first call installs the subscriber.
pub fn init_test_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("atomicbase_core=debug,test=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
