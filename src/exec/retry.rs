//! Lock-contention retry wrapper (spec.md §4.F).
//!
//! Fixed interval ladder, bounded attempt count, cooperative cancellation
//! checked before each attempt and sliced through each sleep so a
//! cancellation during a long wait is noticed promptly rather than only
//! between attempts.

use std::thread::sleep;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::CoreConfig;
use crate::context::CancellationToken;
use crate::error::{CoreError, Result};
use crate::guard::{DriverErrorClass, classify_driver_error};

const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Run `op` against `conn`, retrying while it fails with a lock-contention
/// error, up to `config.max_lock_retries` attempts with the configured
/// backoff ladder between them.
///
/// # Errors
///
/// Returns [`CoreError::Cancelled`] if `cancel` fires, [`CoreError::LockBudgetExhausted`]
/// once the retry budget is spent while still contended, or `op`'s own error
/// unchanged for any non-lock failure.
pub fn execute_with_retry<T>(
    conn: &Connection,
    config: &CoreConfig,
    cancel: &CancellationToken,
    mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let mut attempt = 0usize;
    loop {
        cancel.check()?;
        attempt += 1;
        match op(conn) {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify_driver_error(&err) != DriverErrorClass::Lock {
                    return Err(CoreError::from(err));
                }
                if attempt >= config.max_lock_retries {
                    return Err(CoreError::LockBudgetExhausted);
                }
                sleep_cancelable(config.retry_interval(attempt - 1), cancel)?;
            }
        }
    }
}

fn sleep_cancelable(total: Duration, cancel: &CancellationToken) -> Result<()> {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        cancel.check()?;
        let slice = remaining.min(SLEEP_SLICE);
        sleep(slice);
        remaining -= slice;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn lock_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(5),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn retries_until_success() {
        let conn = Connection::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result = execute_with_retry(&conn, &config, &cancel, |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(lock_error()) } else { Ok(42) }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_lock_error_is_not_retried() {
        let conn = Connection::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result: Result<i32> = execute_with_retry(&conn, &config, &cancel, |_| {
            calls.set(calls.get() + 1);
            Err(rusqlite::Error::QueryReturnedNoRows)
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exhausts_budget_on_persistent_contention() {
        let conn = Connection::open_in_memory().unwrap();
        let mut config = CoreConfig::default();
        config.max_lock_retries = 0;
        let cancel = CancellationToken::new();

        let result: Result<i32> =
            execute_with_retry(&conn, &config, &cancel, |_| Err(lock_error()));

        assert!(matches!(result, Err(CoreError::LockBudgetExhausted)));
    }

    #[test]
    fn exhausts_budget_after_exactly_max_lock_retries_calls() {
        let conn = Connection::open_in_memory().unwrap();
        let mut config = CoreConfig::default();
        config.max_lock_retries = 3;
        let cancel = CancellationToken::new();
        let calls = Cell::new(0);

        let result: Result<i32> = execute_with_retry(&conn, &config, &cancel, |_| {
            calls.set(calls.get() + 1);
            Err(lock_error())
        });

        assert!(matches!(result, Err(CoreError::LockBudgetExhausted)));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn pre_cancelled_token_short_circuits() {
        let conn = Connection::open_in_memory().unwrap();
        let config = CoreConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<i32> = execute_with_retry(&conn, &config, &cancel, |_| Ok(1));
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
