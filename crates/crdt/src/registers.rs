//! The three CRDT register primitives: `MapLww`, `Rga`, `OrSet`.
//!
//! Each primitive exposes `local_*` (always wins, no comparison needed
//! — it's the mutating replica's own causal present) and `remote_*`
//! (returns `true` if the write changed state, `false` if it was a
//! no-op — either because it lost a concurrent conflict or had
//! already been applied). [`crate::document::CrdtDocument`] is the
//! only caller; none of these types know about paths or the document
//! tree.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use verge_core::{tie_break, NodeId, OpId, Value, VectorClock};

use crate::op::{ElementId, Tag};

/// What a live [`MapLww`] entry currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Copy, Serialize, Deserialize)]
pub enum ContainerKind {
    /// A nested `MapLww`.
    Map,
    /// An `Rga` (ordered list / text).
    Rga,
    /// An `OrSet`.
    OrSet,
}

/// The value half of a [`MapLww`] entry: either a plain scalar or a
/// reference to a child container, keyed by its index in the owning
/// document's arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegisterValue {
    /// A leaf value.
    Scalar(Value),
    /// A nested container, identified by arena index.
    Child(usize, ContainerKind),
}

impl RegisterValue {
    /// The container kind, if this is a `Child`.
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            RegisterValue::Child(_, kind) => Some(*kind),
            RegisterValue::Scalar(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stamp {
    clock: VectorClock,
    node_id: NodeId,
    timestamp: i64,
    op_id: OpId,
}

impl Stamp {
    fn key(&self) -> (&NodeId, i64, &OpId) {
        (&self.node_id, self.timestamp, &self.op_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MapEntry {
    value: RegisterValue,
    stamp: Stamp,
}

/// Last-writer-wins register map. Concurrent `set`s on the same key
/// resolve via [`verge_core::tie_break`]; a `delete` racing a `set`
/// resolves the same way, comparing the delete's stamp against the
/// set's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapLww {
    live: FxHashMap<String, MapEntry>,
    tombstones: FxHashMap<String, Stamp>,
}

impl MapLww {
    /// New, empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live value at `key`, if any.
    pub fn get(&self, key: &str) -> Option<&RegisterValue> {
        self.live.get(key).map(|e| &e.value)
    }

    /// Iterate live `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegisterValue)> {
        self.live.iter().map(|(k, e)| (k, &e.value))
    }

    /// Apply a local (always-winning) set.
    pub fn local_set(
        &mut self,
        key: &str,
        value: RegisterValue,
        clock: VectorClock,
        node_id: NodeId,
        timestamp: i64,
        op_id: OpId,
    ) {
        self.tombstones.remove(key);
        self.live.insert(
            key.to_string(),
            MapEntry {
                value,
                stamp: Stamp {
                    clock,
                    node_id,
                    timestamp,
                    op_id,
                },
            },
        );
    }

    /// Apply a local (always-winning) delete.
    pub fn local_delete(
        &mut self,
        key: &str,
        clock: VectorClock,
        node_id: NodeId,
        timestamp: i64,
        op_id: OpId,
    ) {
        self.live.remove(key);
        self.tombstones.insert(
            key.to_string(),
            Stamp {
                clock,
                node_id,
                timestamp,
                op_id,
            },
        );
    }

    /// Apply a remote set. Returns `true` if it changed state.
    #[allow(clippy::too_many_arguments)]
    pub fn remote_set(
        &mut self,
        key: &str,
        value: RegisterValue,
        clock: VectorClock,
        node_id: NodeId,
        timestamp: i64,
        op_id: OpId,
    ) -> bool {
        let incoming = Stamp {
            clock,
            node_id,
            timestamp,
            op_id,
        };
        if !self.wins(key, &incoming) {
            return false;
        }
        self.tombstones.remove(key);
        self.live
            .insert(key.to_string(), MapEntry { value, stamp: incoming });
        true
    }

    /// Apply a remote delete. Returns `true` if it changed state.
    pub fn remote_delete(
        &mut self,
        key: &str,
        clock: VectorClock,
        node_id: NodeId,
        timestamp: i64,
        op_id: OpId,
    ) -> bool {
        let incoming = Stamp {
            clock,
            node_id,
            timestamp,
            op_id,
        };
        if !self.wins(key, &incoming) {
            return false;
        }
        self.live.remove(key);
        self.tombstones.insert(key.to_string(), incoming);
        true
    }

    /// Ensure a child container of the given `kind` exists at `key`,
    /// creating one if the current entry is absent or a losing
    /// conflict. Returns the arena index to use. `allocate` is called
    /// at most once, only when a new container is actually needed.
    pub fn ensure_child(
        &mut self,
        key: &str,
        kind: ContainerKind,
        clock: VectorClock,
        node_id: NodeId,
        timestamp: i64,
        op_id: OpId,
        allocate: impl FnOnce() -> usize,
    ) -> usize {
        if let Some(entry) = self.live.get(key) {
            if let RegisterValue::Child(idx, existing_kind) = &entry.value {
                if *existing_kind == kind {
                    return *idx;
                }
            }
        }
        let incoming = Stamp {
            clock,
            node_id,
            timestamp,
            op_id,
        };
        if !self.wins(key, &incoming) {
            // A conflicting scalar (or other-kind container) already won
            // this key's LWW race. Hand back a fresh, unreferenced arena
            // slot rather than clobbering the winner: writes the caller
            // makes into it are simply not reachable from `to_object()`,
            // the same as if this whole sub-tree had lost the race.
            return allocate();
        }
        let idx = allocate();
        self.tombstones.remove(key);
        self.live.insert(
            key.to_string(),
            MapEntry {
                value: RegisterValue::Child(idx, kind),
                stamp: incoming,
            },
        );
        idx
    }

    fn wins(&self, key: &str, incoming: &Stamp) -> bool {
        let existing = self
            .live
            .get(key)
            .map(|e| &e.stamp)
            .or_else(|| self.tombstones.get(key));
        match existing {
            None => true,
            Some(existing) => tie_break(incoming.key(), existing.key()) == Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RgaElement {
    id: ElementId,
    value: Value,
    deleted: bool,
}

/// Replicated growable array: a causally-ordered list where concurrent
/// inserts at the same position resolve via a descending
/// `(counter, node_id)` sort, not the uniform tie-break rule (see
/// module docs on `verge-crdt` for why list ordering needs its own
/// convention).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rga {
    elements: Vec<RgaElement>,
}

impl Rga {
    /// New, empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-tombstoned) elements.
    pub fn len(&self) -> usize {
        self.elements.iter().filter(|e| !e.deleted).count()
    }

    /// `true` if there are no live elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live values in list order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.elements.iter().filter(|e| !e.deleted).map(|e| &e.value)
    }

    /// The element id currently at live index `idx`, if any.
    pub fn live_id_at(&self, idx: usize) -> Option<ElementId> {
        self.elements
            .iter()
            .filter(|e| !e.deleted)
            .nth(idx)
            .map(|e| e.id.clone())
    }

    /// Insert `value` after `after` (or at the head), allocating
    /// `element_id` for it. Idempotent: re-inserting an id already
    /// present is a no-op.
    pub fn insert(&mut self, after: Option<&ElementId>, element_id: ElementId, value: Value) -> bool {
        if self.elements.iter().any(|e| e.id == element_id) {
            return false;
        }
        let start = match after {
            None => 0,
            Some(after_id) => match self.elements.iter().position(|e| &e.id == after_id) {
                Some(pos) => pos + 1,
                // Causal delivery guarantees the anchor is known; if
                // it somehow isn't (out-of-order delivery bug upstream)
                // fall back to appending rather than panicking.
                None => self.elements.len(),
            },
        };
        let mut pos = start;
        while pos < self.elements.len() && sibling_order(&self.elements[pos].id, &element_id) == Ordering::Greater
        {
            pos += 1;
        }
        self.elements.insert(
            pos,
            RgaElement {
                id: element_id,
                value,
                deleted: false,
            },
        );
        true
    }

    /// Tombstone an element. Returns `true` if it was live.
    pub fn delete(&mut self, element_id: &ElementId) -> bool {
        if let Some(e) = self.elements.iter_mut().find(|e| &e.id == element_id) {
            if !e.deleted {
                e.deleted = true;
                return true;
            }
        }
        false
    }
}

/// Sibling ordering for concurrent inserts at the same anchor: larger
/// `counter` sorts first, ties broken by larger `node_id`.
fn sibling_order(a: &ElementId, b: &ElementId) -> Ordering {
    a.counter.cmp(&b.counter).then(a.node.cmp(&b.node))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OrSetEntry {
    value: Value,
    tags: FxHashSet<Tag>,
}

/// Observed-remove set: `add` associates a fresh tag with a value;
/// `remove` tombstones the tags observed live at remove time. A later
/// `add` whose tag was never tombstoned resurrects the value — this is
/// what makes concurrent add/remove converge to add-wins-over-stale-
/// remove rather than either operation universally winning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrSet {
    live: FxHashMap<String, OrSetEntry>,
    tombstones: FxHashSet<Tag>,
}

impl OrSet {
    /// New, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live values, in arbitrary (map iteration) order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.live.values().filter(|e| !e.tags.is_empty()).map(|e| &e.value)
    }

    /// `true` if `value` currently has any live tag.
    pub fn contains(&self, value: &Value) -> bool {
        self.live
            .get(&canonical_key(value))
            .map(|e| !e.tags.is_empty())
            .unwrap_or(false)
    }

    /// The tags currently live for `value`, for building a remove op.
    pub fn live_tags(&self, value: &Value) -> Vec<Tag> {
        self.live
            .get(&canonical_key(value))
            .map(|e| e.tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a local or remote add. Returns `true` if it changed state
    /// (the tag was fresh and not already tombstoned).
    pub fn add(&mut self, value: Value, tag: Tag) -> bool {
        if self.tombstones.contains(&tag) {
            return false;
        }
        let key = canonical_key(&value);
        let entry = self.live.entry(key).or_insert_with(|| OrSetEntry {
            value,
            tags: FxHashSet::default(),
        });
        entry.tags.insert(tag)
    }

    /// Apply a local or remote remove of the given tags for `value`.
    /// Returns `true` if any tag was live and got tombstoned.
    pub fn remove(&mut self, value: &Value, tags: &[Tag]) -> bool {
        let key = canonical_key(value);
        let mut changed = false;
        if let Some(entry) = self.live.get_mut(&key) {
            for tag in tags {
                if entry.tags.remove(tag) {
                    changed = true;
                }
                self.tombstones.insert(tag.clone());
            }
        } else {
            for tag in tags {
                self.tombstones.insert(tag.clone());
            }
        }
        changed
    }
}

/// Deterministic string key for a `Value`, used to group OR-Set tags by
/// logical value. Relies on `Value::Object` being a `BTreeMap` so two
/// replicas produce byte-identical keys for the same logical value.
fn canonical_key(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: &str) -> NodeId {
        NodeId::new(n)
    }

    fn stamp_args(n: &str, counter: u64, ts: i64) -> (VectorClock, NodeId, i64, OpId) {
        let mut clock = VectorClock::new(node(n));
        clock.tick();
        (clock, node(n), ts, OpId::new(node(n), counter, 0))
    }

    #[test]
    fn map_lww_remote_set_loses_to_larger_node_on_tie() {
        let mut map = MapLww::new();
        let (clock_a, node_a, ts_a, op_a) = stamp_args("a", 1, 100);
        assert!(map.remote_set(
            "x",
            RegisterValue::Scalar(Value::I64(1)),
            clock_a,
            node_a,
            ts_a,
            op_a
        ));
        let (clock_b, node_b, ts_b, op_b) = stamp_args("b", 1, 100);
        assert!(map.remote_set(
            "x",
            RegisterValue::Scalar(Value::I64(2)),
            clock_b,
            node_b,
            ts_b,
            op_b
        ));
        assert_eq!(map.get("x"), Some(&RegisterValue::Scalar(Value::I64(2))));
    }

    #[test]
    fn map_lww_stale_remote_set_is_rejected() {
        let mut map = MapLww::new();
        let (clock_b, node_b, ts_b, op_b) = stamp_args("b", 1, 100);
        map.remote_set(
            "x",
            RegisterValue::Scalar(Value::I64(2)),
            clock_b,
            node_b,
            ts_b,
            op_b,
        );
        let (clock_a, node_a, ts_a, op_a) = stamp_args("a", 1, 100);
        let changed = map.remote_set(
            "x",
            RegisterValue::Scalar(Value::I64(1)),
            clock_a,
            node_a,
            ts_a,
            op_a,
        );
        assert!(!changed);
        assert_eq!(map.get("x"), Some(&RegisterValue::Scalar(Value::I64(2))));
    }

    #[test]
    fn rga_concurrent_inserts_break_ties_by_node_id() {
        let mut rga = Rga::new();
        let a_id = ElementId { node: node("a"), counter: 1 };
        rga.insert(None, a_id.clone(), "a".into());
        let x_id = ElementId { node: node("a"), counter: 2 };
        let y_id = ElementId { node: node("b"), counter: 2 };
        rga.insert(Some(&a_id), x_id, "x".into());
        rga.insert(Some(&a_id), y_id, "y".into());
        let values: Vec<&Value> = rga.values().collect();
        assert_eq!(
            values,
            vec![&Value::from("a"), &Value::from("y"), &Value::from("x")]
        );
    }

    #[test]
    fn orset_add_after_tombstoned_tag_does_not_resurrect() {
        let mut set = OrSet::new();
        let tag = Tag { node: node("a"), counter: 1, timestamp: 1 };
        set.add(Value::from("x"), tag.clone());
        set.remove(&Value::from("x"), &[tag.clone()]);
        assert!(!set.contains(&Value::from("x")));
        assert!(!set.add(Value::from("x"), tag));
        assert!(!set.contains(&Value::from("x")));
    }

    #[test]
    fn orset_fresh_add_resurrects_after_remove() {
        let mut set = OrSet::new();
        let tag1 = Tag { node: node("a"), counter: 1, timestamp: 1 };
        let tag2 = Tag { node: node("b"), counter: 1, timestamp: 2 };
        set.add(Value::from("x"), tag1.clone());
        set.remove(&Value::from("x"), &[tag1]);
        assert!(!set.contains(&Value::from("x")));
        set.add(Value::from("x"), tag2);
        assert!(set.contains(&Value::from("x")));
    }
}
