//! Aggregation result cache
//!
//! Memoizes serialized aggregation results by a fingerprint of the query
//! parameters. Entries expire on a fixed TTL from insertion and the whole
//! cache can be flushed unconditionally. Get and set are deliberately not
//! atomic with the compute in between: concurrent identical requests may
//! race to fill the same key, which is tolerated.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    inserted: Instant,
    value: String,
}

/// Shared cache of serialized aggregation results.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a fingerprint, removing the entry if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = {
            let entry = self.entries.get(key)?;
            if entry.inserted.elapsed() >= self.ttl {
                true
            } else {
                return Some(entry.value.clone());
            }
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert or replace an entry, restarting its TTL.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                inserted: Instant::now(),
                value: value.into(),
            },
        );
    }

    /// Drop every entry immediately.
    pub fn flush(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic cache key covering every query parameter that affects an
/// aggregation result.
pub fn fingerprint(
    window: &str,
    offset: &str,
    namespace: &str,
    cluster: &str,
    field: &str,
    subfield: &str,
    time_series: bool,
) -> String {
    format!("aggregate:{window}:{offset}:{namespace}:{cluster}:{field}:{subfield}:{time_series}")
}
