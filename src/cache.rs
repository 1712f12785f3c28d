//! Content-addressed record cache.
//!
//! Keys are SHA-256 hashes of the document bytes, so renaming a file still
//! hits and reusing a name with new bytes misses. Only successful records are
//! stored. Capacity is bounded by `moka`; eviction is its TinyLFU policy.

use crate::record::StructuredRecord;
use moka::sync::Cache;
use tracing::debug;

/// Thread-safe, capacity-bounded map from content hash to record.
pub struct RecordCache {
    /// `None` when caching is disabled.
    cache: Option<Cache<String, StructuredRecord>>,
}

impl RecordCache {
    /// A cache holding at most `capacity` records. `0` disables caching.
    pub fn new(capacity: usize) -> Self {
        let cache = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .eviction_listener(|key: std::sync::Arc<String>, _, cause| {
                    debug!("Dropped cached record {} ({:?})", &key[..key.len().min(12)], cause);
                })
                .build()
        });
        Self { cache }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn get(&self, hash: &str) -> Option<StructuredRecord> {
        self.cache.as_ref()?.get(hash)
    }

    pub fn insert(&self, hash: &str, record: StructuredRecord) {
        if let Some(ref cache) = self.cache {
            cache.insert(hash.to_string(), record);
        }
    }

    /// Drop one entry; returns whether it was present.
    pub fn invalidate(&self, hash: &str) -> bool {
        let Some(ref cache) = self.cache else {
            return false;
        };
        let present = cache.contains_key(hash);
        cache.invalidate(hash);
        present
    }

    pub fn clear(&self) {
        if let Some(ref cache) = self.cache {
            cache.invalidate_all();
            cache.run_pending_tasks();
        }
    }

    /// Number of cached records, after pending evictions are applied.
    pub fn len(&self) -> usize {
        self.cache
            .as_ref()
            .map(|cache| {
                cache.run_pending_tasks();
                cache.entry_count() as usize
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
