//! The subscription registry: collection-scope and doc-scope indexes
//! over live subscribers, plus broadcast fan-out.
//!
//! Reader/writer discipline: subscribe/unsubscribe take the exclusive
//! guard; broadcast takes the shared guard just long enough to clone a
//! snapshot of subscriber ids, then releases it before sending — so a
//! slow send can never hold the registry lock and block a concurrent
//! subscribe. Broadcasts always iterate snapshots, never live
//! references.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

/// Something that can receive a fanned-out message. Generic over the
/// message type `M` so this crate stays independent of the wire
/// format — `verge-engine` instantiates it with its own envelope type.
pub trait Subscriber<M>: Send + Sync {
    /// Deliver one message to this subscriber.
    fn send(&self, message: M);

    /// Stable id used to key the registry's internal maps.
    fn id(&self) -> &str;
}

struct SubscriberRecord<M> {
    subscriber: Arc<dyn Subscriber<M>>,
    collection_scopes: FxHashSet<String>,
    doc_scopes: FxHashSet<(String, String)>,
}

/// Maps `collection` and `(collection, docId)` to subscriber sets, and
/// subscriber id to its live handle.
pub struct SubscriptionRegistry<M> {
    collection_subs: RwLock<FxHashMap<String, FxHashSet<String>>>,
    doc_subs: RwLock<FxHashMap<(String, String), FxHashSet<String>>>,
    subscribers: RwLock<FxHashMap<String, SubscriberRecord<M>>>,
}

impl<M: Clone> Default for SubscriptionRegistry<M> {
    fn default() -> Self {
        Self {
            collection_subs: RwLock::new(FxHashMap::default()),
            doc_subs: RwLock::new(FxHashMap::default()),
            subscribers: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<M: Clone> SubscriptionRegistry<M> {
    /// A registry with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber handle. A no-op scope-wise until
    /// `subscribe_collection`/`subscribe_doc` is called.
    pub fn register(&self, subscriber: Arc<dyn Subscriber<M>>) {
        let id = subscriber.id().to_string();
        self.subscribers.write().insert(
            id,
            SubscriberRecord {
                subscriber,
                collection_scopes: FxHashSet::default(),
                doc_scopes: FxHashSet::default(),
            },
        );
    }

    /// Drop a subscriber entirely, unwinding every scope it joined.
    /// Call on connection close.
    pub fn remove_subscriber(&self, id: &str) {
        let record = self.subscribers.write().remove(id);
        let Some(record) = record else { return };
        if !record.collection_scopes.is_empty() {
            let mut collection_subs = self.collection_subs.write();
            for collection in &record.collection_scopes {
                if let Some(set) = collection_subs.get_mut(collection) {
                    set.remove(id);
                }
            }
        }
        if !record.doc_scopes.is_empty() {
            let mut doc_subs = self.doc_subs.write();
            for scope in &record.doc_scopes {
                if let Some(set) = doc_subs.get_mut(scope) {
                    set.remove(id);
                }
            }
        }
        tracing::debug!(subscriber = id, "removed subscriber and its scopes");
    }

    /// Join a subscriber to a collection-scope feed.
    pub fn subscribe_collection(&self, id: &str, collection: &str) {
        self.collection_subs
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string());
        if let Some(record) = self.subscribers.write().get_mut(id) {
            record.collection_scopes.insert(collection.to_string());
        }
    }

    /// Leave a collection-scope feed.
    pub fn unsubscribe_collection(&self, id: &str, collection: &str) {
        if let Some(set) = self.collection_subs.write().get_mut(collection) {
            set.remove(id);
        }
        if let Some(record) = self.subscribers.write().get_mut(id) {
            record.collection_scopes.remove(collection);
        }
    }

    /// Join a subscriber to a single document's feed.
    pub fn subscribe_doc(&self, id: &str, collection: &str, doc_id: &str) {
        let scope = (collection.to_string(), doc_id.to_string());
        self.doc_subs.write().entry(scope.clone()).or_default().insert(id.to_string());
        if let Some(record) = self.subscribers.write().get_mut(id) {
            record.doc_scopes.insert(scope);
        }
    }

    /// Leave a single document's feed.
    pub fn unsubscribe_doc(&self, id: &str, collection: &str, doc_id: &str) {
        let scope = (collection.to_string(), doc_id.to_string());
        if let Some(set) = self.doc_subs.write().get_mut(&scope) {
            set.remove(id);
        }
        if let Some(record) = self.subscribers.write().get_mut(id) {
            record.doc_scopes.remove(&scope);
        }
    }

    /// Whether any subscriber currently watches `(collection, docId)`.
    /// Used by tombstone GC as a conservative stand-in for full
    /// vector-clock dominance tracking.
    pub fn has_doc_subscribers(&self, collection: &str, doc_id: &str) -> bool {
        let scope = (collection.to_string(), doc_id.to_string());
        self.doc_subs.read().get(&scope).map(|set| !set.is_empty()).unwrap_or(false)
    }

    /// Send `message` to every subscriber of `collection`, excluding
    /// `exclude` (the originating client, which already applied its
    /// own write locally and shouldn't be echoed its own change).
    pub fn broadcast_collection(&self, collection: &str, message: M, exclude: Option<&str>) {
        let ids: Vec<String> = self
            .collection_subs
            .read()
            .get(collection)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        self.send_to(&ids, message, exclude);
    }

    /// Send `message` to every subscriber of `(collection, docId)`,
    /// excluding `exclude`.
    pub fn broadcast_doc(&self, collection: &str, doc_id: &str, message: M, exclude: Option<&str>) {
        let scope = (collection.to_string(), doc_id.to_string());
        let ids: Vec<String> = self
            .doc_subs
            .read()
            .get(&scope)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        self.send_to(&ids, message, exclude);
    }

    fn send_to(&self, ids: &[String], message: M, exclude: Option<&str>) {
        let handles: Vec<Arc<dyn Subscriber<M>>> = {
            let subscribers = self.subscribers.read();
            ids.iter()
                .filter(|id| Some(id.as_str()) != exclude)
                .filter_map(|id| subscribers.get(id).map(|r| r.subscriber.clone()))
                .collect()
        };
        for handle in handles {
            handle.send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        id: String,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber<String> for Recorder {
        fn send(&self, message: String) {
            self.received.lock().unwrap().push(message);
        }

        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn collection_broadcast_reaches_subscribed_and_not_unsubscribed() {
        let registry: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        let inbox_a = Arc::new(Mutex::new(Vec::new()));
        let inbox_b = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(Recorder { id: "a".into(), received: inbox_a.clone() }));
        registry.register(Arc::new(Recorder { id: "b".into(), received: inbox_b.clone() }));
        registry.subscribe_collection("a", "docs");
        registry.subscribe_collection("b", "docs");
        registry.unsubscribe_collection("b", "docs");
        registry.broadcast_collection("docs", "hello".into(), None);
        assert_eq!(*inbox_a.lock().unwrap(), vec!["hello".to_string()]);
        assert!(inbox_b.lock().unwrap().is_empty());
    }

    #[test]
    fn broadcast_excludes_originator() {
        let registry: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        let inbox = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(Recorder { id: "a".into(), received: inbox.clone() }));
        registry.subscribe_doc("a", "docs", "1");
        registry.broadcast_doc("docs", "1", "op".into(), Some("a"));
        assert!(inbox.lock().unwrap().is_empty());
    }

    #[test]
    fn removing_subscriber_unwinds_all_scopes() {
        let registry: SubscriptionRegistry<String> = SubscriptionRegistry::new();
        let inbox = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(Recorder { id: "a".into(), received: inbox.clone() }));
        registry.subscribe_collection("a", "docs");
        registry.subscribe_doc("a", "docs", "1");
        registry.remove_subscriber("a");
        registry.broadcast_collection("docs", "x".into(), None);
        registry.broadcast_doc("docs", "1", "y".into(), None);
        assert!(inbox.lock().unwrap().is_empty());
    }
}
