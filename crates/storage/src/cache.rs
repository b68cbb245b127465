//! Bounded, lock-striped read-through cache.
//!
//! Striped by [`stable_hash`] of the doc id so that readers and
//! writers for different documents never contend on the same
//! `parking_lot::Mutex`.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use verge_core::Value;

use crate::hash::stable_hash;

/// Where a cached value came from, surfaced to callers that care about
/// read-your-own-write freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Served from the in-memory write buffer, not yet flushed.
    Buffered,
    /// Served from a committed shard row.
    Shard,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    source: CacheSource,
    expires_at_ms: i64,
}

/// Read-through cache keyed by `(collection, docId)`, striped across
/// `stripes` independent mutex-guarded maps.
pub struct ReadCache {
    stripes: Vec<Mutex<FxHashMap<(String, String), CacheEntry>>>,
    ttl_ms: i64,
}

impl ReadCache {
    /// Build a cache with the given stripe count and entry TTL.
    pub fn new(stripes: usize, ttl_ms: i64) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(FxHashMap::default())).collect(),
            ttl_ms,
        }
    }

    fn stripe_for(&self, doc_id: &str) -> &Mutex<FxHashMap<(String, String), CacheEntry>> {
        let idx = (stable_hash(doc_id) as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    /// Look up a cached value, honoring TTL. `now_ms` is the caller's
    /// clock so the cache itself stays free of `SystemTime` calls in
    /// the hot path.
    pub fn get(&self, collection: &str, doc_id: &str, now_ms: i64) -> Option<(Value, CacheSource)> {
        let stripe = self.stripe_for(doc_id);
        let guard = stripe.lock();
        let key = (collection.to_string(), doc_id.to_string());
        guard.get(&key).and_then(|entry| {
            if entry.expires_at_ms > now_ms {
                Some((entry.value.clone(), entry.source))
            } else {
                None
            }
        })
    }

    /// Insert or overwrite a cache entry.
    pub fn put(&self, collection: &str, doc_id: &str, value: Value, source: CacheSource, now_ms: i64) {
        let stripe = self.stripe_for(doc_id);
        let mut guard = stripe.lock();
        guard.insert(
            (collection.to_string(), doc_id.to_string()),
            CacheEntry {
                value,
                source,
                expires_at_ms: now_ms + self.ttl_ms,
            },
        );
    }

    /// Evict a single entry, e.g. after a delete.
    pub fn invalidate(&self, collection: &str, doc_id: &str) {
        let stripe = self.stripe_for(doc_id);
        stripe.lock().remove(&(collection.to_string(), doc_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_within_ttl_hits() {
        let cache = ReadCache::new(4, 1000);
        cache.put("docs", "a", Value::I64(1), CacheSource::Buffered, 0);
        let (value, source) = cache.get("docs", "a", 500).unwrap();
        assert_eq!(value, Value::I64(1));
        assert_eq!(source, CacheSource::Buffered);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache = ReadCache::new(4, 1000);
        cache.put("docs", "a", Value::I64(1), CacheSource::Shard, 0);
        assert!(cache.get("docs", "a", 1001).is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ReadCache::new(4, 1000);
        cache.put("docs", "a", Value::I64(1), CacheSource::Buffered, 0);
        cache.invalidate("docs", "a");
        assert!(cache.get("docs", "a", 0).is_none());
    }
}
