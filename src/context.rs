//! Process-wide execution context (spec.md §4.G/H) and a synchronous
//! cancellation primitive.
//!
//! No example crate in this codebase's lineage models cancellation outside
//! an async runtime; `CancellationToken` is a small, deliberately minimal
//! addition rather than a borrowed `tokio_util` concept (see DESIGN.md).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::Connection;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::schema::SchemaCache;

/// A cooperative cancellation flag shared by clone. Checked by the retry
/// loop and batch executor before and during blocking work (spec.md §4.F).
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Process-wide context shared by every dispatched request: the schema
/// cache, the primary connection, and the core's own tunables. Tenant
/// connections (spec.md §4.G) are opened per request and are not held here.
pub struct CoreContext {
    pub schema_cache: SchemaCache,
    pub primary: Connection,
    pub config: CoreConfig,
}

impl CoreContext {
    #[must_use]
    pub fn new(primary: Connection, config: CoreConfig) -> Self {
        Self {
            schema_cache: SchemaCache::new(),
            primary,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.check().is_err());
    }

    #[test]
    fn clones_share_cancellation_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
