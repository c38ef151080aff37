//! Schema cache and primary-snapshot holder (spec.md §4.B).
//!
//! The cache is a concurrent map of `templateId -> {version, snapshot}`.
//! Readers take no locks on a snapshot itself (it is immutable once
//! published); writers replace the entry atomically so readers always see
//! either the previous version or the new one, never a torn structure. The
//! primary snapshot is protected by a single reader/writer lock; everything
//! else sees it via a brief read-locked clone of the `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::model::Schema;

/// Sentinel template id for the primary database.
pub const PRIMARY_TEMPLATE_ID: i64 = 0;

#[derive(Clone)]
struct CacheEntry {
    version: i64,
    schema: Arc<Schema>,
}

/// A loader for the "current" version of a template, backed by the
/// metadata store (spec.md §6). Abstracted behind a trait so the cache can
/// be unit-tested without a real primary connection.
pub trait TemplateLoader {
    /// Load the current `(version, schema)` for `template_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the template or its current version cannot be
    /// found or the schema blob cannot be decoded.
    fn load_current(&self, template_id: i64) -> Result<(i64, Schema)>;

    /// List every known template id, used by [`SchemaCache::preload`].
    ///
    /// # Errors
    ///
    /// Returns an error if the template catalog cannot be read.
    fn all_template_ids(&self) -> Result<Vec<i64>>;
}

/// Process-wide, versioned, copy-on-read schema cache.
pub struct SchemaCache {
    primary: RwLock<Arc<Schema>>,
    templates: RwLock<HashMap<i64, CacheEntry>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: RwLock::new(Arc::new(Schema::default())),
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a new primary snapshot atomically.
    pub fn set_primary(&self, schema: Schema) {
        let mut guard = self.primary.write().expect("primary lock poisoned");
        *guard = Arc::new(schema);
    }

    /// A brief read-locked clone of the primary snapshot's `Arc`.
    #[must_use]
    pub fn primary(&self) -> Arc<Schema> {
        Arc::clone(&self.primary.read().expect("primary lock poisoned"))
    }

    /// Resolve `(snapshot, version)` for `template_id`. For
    /// [`PRIMARY_TEMPLATE_ID`] this always returns the current primary
    /// snapshot under version `0`. Otherwise consults the cache; on miss,
    /// loads the current version via `loader` and publishes it before
    /// returning. Concurrent misses race to load; the first loader to
    /// finish wins and subsequent callers observe its published entry.
    ///
    /// # Errors
    ///
    /// Returns an error if `loader` fails to load the template.
    pub fn get_cached(
        &self,
        loader: &impl TemplateLoader,
        template_id: i64,
    ) -> Result<(Arc<Schema>, i64)> {
        if template_id == PRIMARY_TEMPLATE_ID {
            return Ok((self.primary(), 0));
        }

        if let Some(entry) = self.templates.read().expect("cache lock poisoned").get(&template_id)
        {
            return Ok((Arc::clone(&entry.schema), entry.version));
        }

        let (version, schema) = loader.load_current(template_id)?;
        let schema = Arc::new(schema);
        let mut guard = self.templates.write().expect("cache lock poisoned");
        // First loader wins: if another thread published a version already,
        // keep whichever is already there rather than clobbering it with a
        // possibly-stale concurrent load.
        let entry = guard.entry(template_id).or_insert_with(|| CacheEntry {
            version,
            schema: Arc::clone(&schema),
        });
        Ok((Arc::clone(&entry.schema), entry.version))
    }

    /// Load the current version of every known template into the cache.
    /// Failures are non-fatal and log-only, per spec.md §4.B.
    pub fn preload(&self, loader: &impl TemplateLoader) {
        let ids = match loader.all_template_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "failed to list templates for preload");
                return;
            }
        };

        for template_id in ids {
            match loader.load_current(template_id) {
                Ok((version, schema)) => {
                    let mut guard = self.templates.write().expect("cache lock poisoned");
                    guard.insert(
                        template_id,
                        CacheEntry {
                            version,
                            schema: Arc::new(schema),
                        },
                    );
                    debug!(template_id, version, "preloaded template schema");
                }
                Err(err) => {
                    warn!(template_id, error = %err, "failed to preload template schema");
                }
            }
        }
    }

    /// Evict a template's cache entry. The next [`Self::get_cached`] call
    /// reloads it from the metadata store.
    pub fn invalidate(&self, template_id: i64) {
        self.templates
            .write()
            .expect("cache lock poisoned")
            .remove(&template_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::tables_to_snapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
        version: i64,
    }

    impl TemplateLoader for CountingLoader {
        fn load_current(&self, _template_id: i64) -> Result<(i64, Schema)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.version, tables_to_snapshot(vec![])))
        }

        fn all_template_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![1])
        }
    }

    #[test]
    fn miss_then_hit_loads_once() {
        let cache = SchemaCache::new();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            version: 3,
        };

        let (_, v1) = cache.get_cached(&loader, 1).unwrap();
        let (_, v2) = cache.get_cached(&loader, 1).unwrap();
        assert_eq!(v1, 3);
        assert_eq!(v2, 3);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn primary_template_id_bypasses_loader() {
        let cache = SchemaCache::new();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            version: 9,
        };
        let (_, version) = cache.get_cached(&loader, PRIMARY_TEMPLATE_ID).unwrap();
        assert_eq!(version, 0);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache = SchemaCache::new();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            version: 1,
        };
        cache.get_cached(&loader, 5).unwrap();
        cache.invalidate(5);
        cache.get_cached(&loader, 5).unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_monotonicity_without_invalidate() {
        let cache = SchemaCache::new();
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            version: 7,
        };
        let (_, v1) = cache.get_cached(&loader, 2).unwrap();
        let (_, v2) = cache.get_cached(&loader, 2).unwrap();
        assert!(v2 >= v1);
    }
}
