//! Per-document presence: who is looking at a document right now,
//! where their cursor is, and an idle sweep that evicts stale
//! participants as synthetic leaves.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use verge_core::{NodeId, Value};

/// One participant's presence state for a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    /// Client-supplied user metadata (name, color, avatar, ...), opaque
    /// to this crate.
    pub user_info: Value,
    /// Last reported cursor position, if any.
    pub cursor: Option<Value>,
    /// Last reported selection range, if any.
    pub selection: Option<Value>,
    /// Epoch millis of the last update (join, cursor, or selection).
    pub last_seen_ms: i64,
}

/// A participant that aged out of a document without sending an
/// explicit leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedParticipant {
    /// Collection the document belongs to.
    pub collection: String,
    /// Document id.
    pub doc_id: String,
    /// The node that went idle.
    pub node_id: NodeId,
}

type DocKey = (String, String);

/// Tracks live participants per `(collection, docId)`.
///
/// A later `join`/`cursor_update` for the same `(doc, node)` always
/// replaces the prior entry outright — presence is last-writer-wins
/// per participant, not merged, since only the most recent cursor
/// position is ever meaningful.
pub struct PresenceManager {
    docs: RwLock<FxHashMap<DocKey, FxHashMap<NodeId, PresenceState>>>,
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self { docs: RwLock::new(FxHashMap::default()) }
    }
}

impl PresenceManager {
    /// A manager tracking no documents yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a participant joining a document.
    pub fn join(&self, collection: &str, doc_id: &str, node_id: NodeId, user_info: Value, now_ms: i64) {
        let key = (collection.to_string(), doc_id.to_string());
        self.docs.write().entry(key).or_default().insert(
            node_id,
            PresenceState { user_info, cursor: None, selection: None, last_seen_ms: now_ms },
        );
    }

    /// Record a participant explicitly leaving. Returns `true` if it
    /// was actually present.
    pub fn leave(&self, collection: &str, doc_id: &str, node_id: &NodeId) -> bool {
        let key = (collection.to_string(), doc_id.to_string());
        let mut docs = self.docs.write();
        let Some(participants) = docs.get_mut(&key) else { return false };
        let removed = participants.remove(node_id).is_some();
        if participants.is_empty() {
            docs.remove(&key);
        }
        removed
    }

    /// Update a participant's cursor/selection. A no-op if the
    /// participant never joined (the caller should treat this as an
    /// implicit join rather than silently dropping the update — call
    /// `join` first if uncertain).
    pub fn cursor_update(
        &self,
        collection: &str,
        doc_id: &str,
        node_id: &NodeId,
        cursor: Option<Value>,
        selection: Option<Value>,
        now_ms: i64,
    ) -> bool {
        let key = (collection.to_string(), doc_id.to_string());
        let mut docs = self.docs.write();
        let Some(state) = docs.get_mut(&key).and_then(|p| p.get_mut(node_id)) else { return false };
        if cursor.is_some() {
            state.cursor = cursor;
        }
        if selection.is_some() {
            state.selection = selection;
        }
        state.last_seen_ms = now_ms;
        true
    }

    /// Current participants of a document, in no particular order.
    pub fn participants(&self, collection: &str, doc_id: &str) -> Vec<(NodeId, PresenceState)> {
        let key = (collection.to_string(), doc_id.to_string());
        self.docs
            .read()
            .get(&key)
            .map(|p| p.iter().map(|(id, state)| (id.clone(), state.clone())).collect())
            .unwrap_or_default()
    }

    /// Evict every participant whose `last_seen_ms` is older than
    /// `now_ms - ttl_ms`, returning the evictions as synthetic leaves
    /// for the caller to broadcast.
    pub fn sweep_idle(&self, now_ms: i64, ttl_ms: i64) -> Vec<EvictedParticipant> {
        let mut evicted = Vec::new();
        let mut docs = self.docs.write();
        docs.retain(|(collection, doc_id), participants| {
            participants.retain(|node_id, state| {
                let idle = now_ms - state.last_seen_ms >= ttl_ms;
                if idle {
                    evicted.push(EvictedParticipant {
                        collection: collection.clone(),
                        doc_id: doc_id.clone(),
                        node_id: node_id.clone(),
                    });
                }
                !idle
            });
            !participants.is_empty()
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::from(id.to_string())
    }

    #[test]
    fn join_then_leave_clears_the_participant() {
        let presence = PresenceManager::new();
        presence.join("docs", "1", node("a"), Value::Null, 0);
        assert_eq!(presence.participants("docs", "1").len(), 1);
        assert!(presence.leave("docs", "1", &node("a")));
        assert!(presence.participants("docs", "1").is_empty());
    }

    #[test]
    fn cursor_update_replaces_latest_position_only() {
        let presence = PresenceManager::new();
        presence.join("docs", "1", node("a"), Value::Null, 0);
        presence.cursor_update("docs", "1", &node("a"), Some(Value::I64(3)), None, 10);
        presence.cursor_update("docs", "1", &node("a"), Some(Value::I64(7)), None, 20);
        let participants = presence.participants("docs", "1");
        assert_eq!(participants[0].1.cursor, Some(Value::I64(7)));
        assert_eq!(participants[0].1.last_seen_ms, 20);
    }

    #[test]
    fn sweep_idle_evicts_past_ttl_and_leaves_fresh_ones() {
        let presence = PresenceManager::new();
        presence.join("docs", "1", node("stale"), Value::Null, 0);
        presence.join("docs", "1", node("fresh"), Value::Null, 29_000);
        let evicted = presence.sweep_idle(30_000, 30_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].node_id, node("stale"));
        let remaining = presence.participants("docs", "1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, node("fresh"));
    }
}
