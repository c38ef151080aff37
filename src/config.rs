//! Configuration for the core's own tunables.
//!
//! The core does not load tenant credentials, HTTP bindings, or the
//! platform-management configuration (all external collaborators, see
//! spec.md §1); it only owns the compile/execute limits named throughout
//! spec.md §4 as fixed constants. Values are defaulted, then overridden by
//! `ATOMICBASE_*` environment variables, following the precedence-merge
//! shape of the teacher's config layer without the multi-file layering this
//! crate has no use for.

use std::env;
use std::time::Duration;

/// Compile/execute limits for the query gateway core.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Max array length for an `in` filter (spec.md §4.C).
    pub max_in_array_size: usize,
    /// Max relation-tree depth for nested selects (spec.md §4.D.1).
    pub max_query_depth: usize,
    /// Column-pair budget before `json_object` chunking kicks in (spec.md §4.D.1).
    pub max_select_columns: usize,
    /// Max operations in a single batch call (spec.md §4.F).
    pub max_batch_operations: usize,
    /// Max attempts in the lock-contention retry loop (spec.md §4.F).
    pub max_lock_retries: usize,
    /// Sleep ladder (ms) indexed by `min(attempt, len - 1)` (spec.md §4.F).
    pub retry_intervals_ms: Vec<u64>,
    /// Default `LIMIT` when the caller omits one (spec.md §4.D.3).
    pub default_limit: i64,
    /// Hard cap clamping the effective limit; 0 disables the cap (spec.md §4.D.3).
    pub max_limit: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_in_array_size: 100,
            max_query_depth: 5,
            max_select_columns: 50,
            max_batch_operations: 100,
            max_lock_retries: 12,
            retry_intervals_ms: vec![50, 100, 150, 200, 300, 400, 500, 700, 1000],
            default_limit: 100,
            max_limit: 0,
        }
    }
}

impl CoreConfig {
    /// Build configuration from defaults overridden by environment variables.
    ///
    /// Recognized variables: `ATOMICBASE_MAX_IN_ARRAY_SIZE`,
    /// `ATOMICBASE_MAX_QUERY_DEPTH`, `ATOMICBASE_MAX_SELECT_COLUMNS`,
    /// `ATOMICBASE_MAX_BATCH_OPERATIONS`, `ATOMICBASE_MAX_LOCK_RETRIES`,
    /// `ATOMICBASE_DEFAULT_LIMIT`, `ATOMICBASE_MAX_LIMIT`. Malformed values
    /// are ignored (the default is kept).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("ATOMICBASE_MAX_IN_ARRAY_SIZE") {
            config.max_in_array_size = v;
        }
        if let Some(v) = env_usize("ATOMICBASE_MAX_QUERY_DEPTH") {
            config.max_query_depth = v;
        }
        if let Some(v) = env_usize("ATOMICBASE_MAX_SELECT_COLUMNS") {
            config.max_select_columns = v;
        }
        if let Some(v) = env_usize("ATOMICBASE_MAX_BATCH_OPERATIONS") {
            config.max_batch_operations = v;
        }
        if let Some(v) = env_usize("ATOMICBASE_MAX_LOCK_RETRIES") {
            config.max_lock_retries = v;
        }
        if let Some(v) = env_i64("ATOMICBASE_DEFAULT_LIMIT") {
            config.default_limit = v;
        }
        if let Some(v) = env_i64("ATOMICBASE_MAX_LIMIT") {
            config.max_limit = v;
        }

        config
    }

    /// The sleep duration for a given retry attempt, per spec.md §4.F point 3:
    /// `intervals[min(attempt, len(intervals) - 1)]`.
    #[must_use]
    pub fn retry_interval(&self, attempt: usize) -> Duration {
        let idx = attempt.min(self.retry_intervals_ms.len() - 1);
        Duration::from_millis(self.retry_intervals_ms[idx])
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok()?.trim().parse().ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = CoreConfig::default();
        assert_eq!(config.max_in_array_size, 100);
        assert_eq!(config.max_batch_operations, 100);
        assert_eq!(config.max_lock_retries, 12);
        assert_eq!(config.max_select_columns, 50);
        assert_eq!(
            config.retry_intervals_ms,
            vec![50, 100, 150, 200, 300, 400, 500, 700, 1000]
        );
    }

    #[test]
    fn retry_interval_clamps_to_last() {
        let config = CoreConfig::default();
        assert_eq!(config.retry_interval(0), Duration::from_millis(50));
        assert_eq!(config.retry_interval(8), Duration::from_millis(1000));
        assert_eq!(config.retry_interval(100), Duration::from_millis(1000));
    }
}
