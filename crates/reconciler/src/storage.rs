//! Storage adapter contract for the reconciler's persistent state: the
//! offline op queue and per-collection watermarks. A durable on-disk
//! implementation is an SDK-side concern; this crate ships only the
//! trait and an in-memory implementation for tests.

use dashmap::DashMap;
use verge_core::VergeResult;

/// Byte-oriented key/value storage the reconciler persists its queue
/// and watermarks to. Keys are namespaced (`queue/...`, `watermark/...`)
/// by the reconciler itself, so a single flat store is sufficient.
pub trait ReconcilerStorage: Send + Sync {
    /// Fetch the raw bytes stored under `key`, if any.
    fn get(&self, key: &str) -> VergeResult<Option<Vec<u8>>>;
    /// Store `value` under `key`, replacing whatever was there.
    fn set(&self, key: &str, value: Vec<u8>) -> VergeResult<()>;
    /// Remove `key` if present.
    fn delete(&self, key: &str) -> VergeResult<()>;
    /// List every key starting with `prefix`.
    fn keys(&self, prefix: &str) -> VergeResult<Vec<String>>;
}

/// `DashMap`-backed storage, for tests and for hosts that don't need
/// the queue to survive a process restart.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconcilerStorage for InMemoryStorage {
    fn get(&self, key: &str) -> VergeResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> VergeResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> VergeResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> VergeResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = InMemoryStorage::new();
        store.set("queue/docs/1", b"payload".to_vec()).unwrap();
        assert_eq!(store.get("queue/docs/1").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn delete_removes_entry() {
        let store = InMemoryStorage::new();
        store.set("k", b"v".to_vec()).unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn keys_filters_by_prefix() {
        let store = InMemoryStorage::new();
        store.set("queue/a", vec![]).unwrap();
        store.set("queue/b", vec![]).unwrap();
        store.set("watermark/a", vec![]).unwrap();
        let mut keys = store.keys("queue/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["queue/a".to_string(), "queue/b".to_string()]);
    }
}
