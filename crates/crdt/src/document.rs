//! `CrdtDocument`: the arena-based tree of CRDT registers backing a
//! single `(collection, docId)`.
//!
//! The tree is addressed by paths of string keys. A path's
//! intermediate segments are `MapLww` nodes, auto-created on first
//! write; the leaf is either a scalar or, for list/set operations, an
//! `Rga`/`OrSet` node. Nodes live in a flat arena (`Vec<NodeKind>`)
//! rather than behind `Rc<RefCell<_>>` — indices are a purely local
//! implementation detail, never compared or serialized across
//! replicas, so there is no identity to keep consistent between them.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use verge_core::{ClockOrdering, ErrorCode, Limits, NodeId, OpId, Value, VergeError, VergeResult, VectorClock};

use crate::op::{ElementId, OpPayload, Operation, Tag};
use crate::registers::{ContainerKind, MapLww, OrSet, RegisterValue, Rga};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum NodeKind {
    Map(MapLww),
    Rga(Rga),
    OrSet(OrSet),
}

#[derive(Clone)]
struct Stamp {
    clock: VectorClock,
    node_id: NodeId,
    timestamp: i64,
    op_id: OpId,
}

/// Bounded, order-preserving set of recently applied op ids, used to
/// make `apply_remote` idempotent under at-least-once delivery without
/// growing unboundedly.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppliedOpWindow {
    order: VecDeque<OpId>,
    seen: FxHashSet<OpId>,
    capacity: usize,
}

impl AppliedOpWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: FxHashSet::default(),
            capacity,
        }
    }

    fn contains(&self, op_id: &OpId) -> bool {
        self.seen.contains(op_id)
    }

    fn insert(&mut self, op_id: OpId) {
        if self.seen.insert(op_id.clone()) {
            self.order.push_back(op_id);
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}

/// A single document's CRDT state: the arena of map/list/set nodes,
/// this replica's own clock, and the bounded applied-op dedup window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrdtDocument {
    node_id: NodeId,
    clock: VectorClock,
    nonce: u64,
    arena: Vec<NodeKind>,
    applied: AppliedOpWindow,
    #[serde(skip)]
    limits: Limits,
}

impl CrdtDocument {
    /// A fresh, empty document owned by `node_id`.
    pub fn new(node_id: NodeId, limits: Limits) -> Self {
        let applied = AppliedOpWindow::new(limits.applied_op_history);
        Self {
            clock: VectorClock::new(node_id.clone()),
            node_id,
            nonce: 0,
            arena: vec![NodeKind::Map(MapLww::new())],
            applied,
            limits,
        }
    }

    /// Materialize the document as a plain `Value::Object`.
    pub fn to_object(&self) -> Value {
        self.node_to_value(0)
    }

    fn node_to_value(&self, idx: usize) -> Value {
        match &self.arena[idx] {
            NodeKind::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            RegisterValue::Scalar(val) => val.clone(),
                            RegisterValue::Child(child_idx, _) => self.node_to_value(*child_idx),
                        };
                        (k.clone(), value)
                    })
                    .collect(),
            ),
            NodeKind::Rga(r) => Value::Array(r.values().cloned().collect()),
            NodeKind::OrSet(s) => Value::Array(s.values().cloned().collect()),
        }
    }

    fn new_local_stamp(&mut self) -> Stamp {
        let clock = self.clock.tick();
        let counter = clock.get(&self.node_id);
        let timestamp = now_millis();
        let op_id = OpId::new(self.node_id.clone(), counter, self.nonce);
        Stamp {
            clock,
            node_id: self.node_id.clone(),
            timestamp,
            op_id,
        }
    }

    fn remote_stamp(op: &Operation) -> Stamp {
        Stamp {
            clock: op.clock.clone(),
            node_id: op.node_id.clone(),
            timestamp: op.timestamp,
            op_id: op.op_id.clone(),
        }
    }

    fn check_path(&self, path: &[String]) -> VergeResult<()> {
        if path.is_empty() {
            return Err(VergeError::validation(ErrorCode::BadPath, "path must not be empty"));
        }
        if path.len() > self.limits.max_nesting_depth {
            return Err(VergeError::validation(
                ErrorCode::BadPath,
                format!(
                    "path depth {} exceeds max_nesting_depth {}",
                    path.len(),
                    self.limits.max_nesting_depth
                ),
            ));
        }
        Ok(())
    }

    /// Ensure a `Map` child of `parent_idx` exists at `key`, creating
    /// one (or any other container kind needed en route) if absent.
    fn ensure_child_at(&mut self, parent_idx: usize, key: &str, kind: ContainerKind, stamp: &Stamp) -> usize {
        let mut map = match std::mem::replace(&mut self.arena[parent_idx], NodeKind::Map(MapLww::new())) {
            NodeKind::Map(m) => m,
            other => {
                // Path walked through a non-map node (a prior write
                // raced a scalar into this slot). Leave it as-is and
                // operate on a throwaway map; the caller's write will
                // simply not be reachable from `to_object()`.
                self.arena[parent_idx] = other;
                MapLww::new()
            }
        };
        let arena = &mut self.arena;
        let idx = map.ensure_child(
            key,
            kind,
            stamp.clock.clone(),
            stamp.node_id.clone(),
            stamp.timestamp,
            stamp.op_id.clone(),
            || {
                let new_idx = arena.len();
                arena.push(match kind {
                    ContainerKind::Map => NodeKind::Map(MapLww::new()),
                    ContainerKind::Rga => NodeKind::Rga(Rga::new()),
                    ContainerKind::OrSet => NodeKind::OrSet(OrSet::new()),
                });
                new_idx
            },
        );
        self.arena[parent_idx] = NodeKind::Map(map);
        idx
    }

    fn resolve_parent_map(&mut self, path: &[String], stamp: &Stamp) -> usize {
        let mut idx = 0;
        for seg in &path[..path.len() - 1] {
            idx = self.ensure_child_at(idx, seg, ContainerKind::Map, stamp);
        }
        idx
    }

    fn resolve_container(&mut self, path: &[String], kind: ContainerKind, stamp: &Stamp) -> usize {
        let parent = self.resolve_parent_map(path, stamp);
        let key = path.last().expect("checked non-empty by check_path");
        self.ensure_child_at(parent, key, kind, stamp)
    }

    fn map_at_mut(&mut self, idx: usize) -> &mut MapLww {
        match &mut self.arena[idx] {
            NodeKind::Map(m) => m,
            _ => unreachable!("resolve_parent_map always yields a Map node"),
        }
    }

    fn rga_at_mut(&mut self, idx: usize) -> &mut Rga {
        match &mut self.arena[idx] {
            NodeKind::Rga(r) => r,
            _ => unreachable!("resolve_container(Rga) always yields an Rga node"),
        }
    }

    fn orset_at_mut(&mut self, idx: usize) -> &mut OrSet {
        match &mut self.arena[idx] {
            NodeKind::OrSet(s) => s,
            _ => unreachable!("resolve_container(OrSet) always yields an OrSet node"),
        }
    }

    // --- Local mutations -------------------------------------------------

    /// Set a scalar value at `path`, returning the generated operation
    /// for broadcast/persistence.
    pub fn local_set(&mut self, path: Vec<String>, value: Value) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let parent = self.resolve_parent_map(&path, &stamp);
        let key = path.last().expect("checked non-empty").clone();
        self.map_at_mut(parent).local_set(
            &key,
            RegisterValue::Scalar(value.clone()),
            stamp.clock.clone(),
            stamp.node_id.clone(),
            stamp.timestamp,
            stamp.op_id.clone(),
        );
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(stamp, OpPayload::MapSet { path, value }))
    }

    /// Delete the value at `path`.
    pub fn local_delete(&mut self, path: Vec<String>) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let parent = self.resolve_parent_map(&path, &stamp);
        let key = path.last().expect("checked non-empty").clone();
        self.map_at_mut(parent).local_delete(
            &key,
            stamp.clock.clone(),
            stamp.node_id.clone(),
            stamp.timestamp,
            stamp.op_id.clone(),
        );
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(stamp, OpPayload::MapDelete { path }))
    }

    /// Insert `value` into the RGA at `path`, after the element
    /// currently at live index `after_index` (`None` inserts at the
    /// head).
    pub fn local_rga_insert(
        &mut self,
        path: Vec<String>,
        after_index: Option<usize>,
        value: Value,
    ) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let rga_idx = self.resolve_container(&path, ContainerKind::Rga, &stamp);
        let rga = self.rga_at_mut(rga_idx);
        if rga.len() >= self.limits.max_rga_elements {
            return Err(VergeError::validation(
                ErrorCode::BadPath,
                "rga element limit exceeded",
            ));
        }
        let after = after_index.and_then(|i| rga.live_id_at(i));
        let element_id = ElementId {
            node: stamp.node_id.clone(),
            counter: stamp.clock.get(&stamp.node_id),
        };
        rga.insert(after.as_ref(), element_id.clone(), value.clone());
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(
            stamp,
            OpPayload::RgaInsert {
                path,
                after,
                element_id,
                value,
            },
        ))
    }

    /// Delete an RGA element at the given live index.
    pub fn local_rga_delete(&mut self, path: Vec<String>, index: usize) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let rga_idx = self.resolve_container(&path, ContainerKind::Rga, &stamp);
        let rga = self.rga_at_mut(rga_idx);
        let element_id = rga
            .live_id_at(index)
            .ok_or_else(|| VergeError::validation(ErrorCode::BadPath, "rga index out of range"))?;
        rga.delete(&element_id);
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(stamp, OpPayload::RgaDelete { path, element_id }))
    }

    /// Add `value` to the OR-Set at `path`.
    pub fn local_orset_add(&mut self, path: Vec<String>, value: Value) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let set_idx = self.resolve_container(&path, ContainerKind::OrSet, &stamp);
        let tag = Tag {
            node: stamp.node_id.clone(),
            counter: stamp.clock.get(&stamp.node_id),
            timestamp: stamp.timestamp,
        };
        self.orset_at_mut(set_idx).add(value.clone(), tag.clone());
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(stamp, OpPayload::OrSetAdd { path, value, tag }))
    }

    /// Remove `value` from the OR-Set at `path`.
    pub fn local_orset_remove(&mut self, path: Vec<String>, value: Value) -> VergeResult<Operation> {
        self.check_path(&path)?;
        let stamp = self.new_local_stamp();
        let set_idx = self.resolve_container(&path, ContainerKind::OrSet, &stamp);
        let tags = self.orset_at_mut(set_idx).live_tags(&value);
        self.orset_at_mut(set_idx).remove(&value, &tags);
        self.applied.insert(stamp.op_id.clone());
        Ok(self.finish_local(stamp, OpPayload::OrSetRemove { path, value, tags }))
    }

    fn finish_local(&mut self, stamp: Stamp, payload: OpPayload) -> Operation {
        Operation {
            op_id: stamp.op_id,
            clock: stamp.clock,
            node_id: stamp.node_id,
            timestamp: stamp.timestamp,
            payload,
        }
    }

    // --- Remote application ----------------------------------------------

    /// Apply a remote operation. Returns `true` if it changed the
    /// document's visible state, `false` if it was a replay or lost a
    /// concurrent conflict.
    pub fn apply_remote(&mut self, op: &Operation) -> VergeResult<bool> {
        if self.applied.contains(&op.op_id) {
            tracing::trace!(op_id = %op.op_id, "dropping already-applied remote op");
            return Ok(false);
        }
        self.clock.merge(&op.clock);
        let stamp = Self::remote_stamp(op);
        let changed = match &op.payload {
            OpPayload::MapSet { path, value } => {
                self.check_path(path)?;
                let parent = self.resolve_parent_map(path, &stamp);
                let key = path.last().expect("checked non-empty");
                self.map_at_mut(parent).remote_set(
                    key,
                    RegisterValue::Scalar(value.clone()),
                    stamp.clock.clone(),
                    stamp.node_id.clone(),
                    stamp.timestamp,
                    stamp.op_id.clone(),
                )
            }
            OpPayload::MapDelete { path } => {
                self.check_path(path)?;
                let parent = self.resolve_parent_map(path, &stamp);
                let key = path.last().expect("checked non-empty");
                self.map_at_mut(parent).remote_delete(
                    key,
                    stamp.clock.clone(),
                    stamp.node_id.clone(),
                    stamp.timestamp,
                    stamp.op_id.clone(),
                )
            }
            OpPayload::RgaInsert {
                path,
                after,
                element_id,
                value,
            } => {
                self.check_path(path)?;
                let rga_idx = self.resolve_container(path, ContainerKind::Rga, &stamp);
                self.rga_at_mut(rga_idx)
                    .insert(after.as_ref(), element_id.clone(), value.clone())
            }
            OpPayload::RgaDelete { path, element_id } => {
                self.check_path(path)?;
                let rga_idx = self.resolve_container(path, ContainerKind::Rga, &stamp);
                self.rga_at_mut(rga_idx).delete(element_id)
            }
            OpPayload::OrSetAdd { path, value, tag } => {
                self.check_path(path)?;
                let set_idx = self.resolve_container(path, ContainerKind::OrSet, &stamp);
                self.orset_at_mut(set_idx).add(value.clone(), tag.clone())
            }
            OpPayload::OrSetRemove { path, value, tags } => {
                self.check_path(path)?;
                let set_idx = self.resolve_container(path, ContainerKind::OrSet, &stamp);
                self.orset_at_mut(set_idx).remove(value, tags)
            }
        };
        self.applied.insert(op.op_id.clone());
        if !changed {
            tracing::debug!(op_id = %op.op_id, "remote op lost a concurrent conflict");
        }
        Ok(changed)
    }

    /// Apply a batch of remote operations, ordering them by causal
    /// dependency first and falling back to the uniform tie-break rule
    /// for pairs the vector clock can't order. Returns how many
    /// actually changed state.
    pub fn apply_remote_batch(&mut self, mut ops: Vec<Operation>) -> VergeResult<usize> {
        ops.sort_by(|a, b| match a.clock.compare(&b.clock) {
            ClockOrdering::Less => std::cmp::Ordering::Less,
            ClockOrdering::Greater => std::cmp::Ordering::Greater,
            ClockOrdering::Equal | ClockOrdering::Concurrent => {
                verge_core::tie_break(a.tie_break_key(), b.tie_break_key())
            }
        });
        let mut changed = 0;
        for op in &ops {
            if self.apply_remote(op)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Replica id this document advances its own clock under.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Current vector clock snapshot.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Reapply configured limits after deserializing a snapshot, since
    /// `Limits` is `#[serde(skip)]` and comes back as `Limits::default()`.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: &str) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn nested_map_set_auto_creates_intermediates() {
        let mut doc = CrdtDocument::new(node("a"), Limits::default());
        doc.local_set(vec!["profile".into(), "name".into()], Value::from("Ada"))
            .unwrap();
        let obj = doc.to_object();
        let profile = obj.as_object().unwrap().get("profile").unwrap();
        assert_eq!(profile.as_object().unwrap().get("name"), Some(&Value::from("Ada")));
    }

    #[test]
    fn two_replicas_converge_after_exchanging_ops() {
        let mut a = CrdtDocument::new(node("a"), Limits::default());
        let mut b = CrdtDocument::new(node("b"), Limits::default());
        let op_a = a.local_set(vec!["x".into()], Value::I64(1)).unwrap();
        let op_b = b.local_set(vec!["y".into()], Value::I64(2)).unwrap();
        a.apply_remote(&op_b).unwrap();
        b.apply_remote(&op_a).unwrap();
        assert_eq!(a.to_object(), b.to_object());
    }

    #[test]
    fn apply_remote_is_idempotent() {
        let mut a = CrdtDocument::new(node("a"), Limits::default());
        let mut b = CrdtDocument::new(node("b"), Limits::default());
        let op = a.local_set(vec!["x".into()], Value::I64(1)).unwrap();
        assert!(b.apply_remote(&op).unwrap());
        assert!(!b.apply_remote(&op).unwrap());
    }

    #[test]
    fn concurrent_map_set_resolves_by_tie_break_on_both_replicas() {
        let mut a = CrdtDocument::new(node("a"), Limits::default());
        let mut b = CrdtDocument::new(node("b"), Limits::default());
        let op_a = a.local_set(vec!["x".into()], Value::from("from-a")).unwrap();
        let op_b = b.local_set(vec!["x".into()], Value::from("from-b")).unwrap();
        a.apply_remote(&op_b).unwrap();
        b.apply_remote(&op_a).unwrap();
        assert_eq!(a.to_object(), b.to_object());
    }

    #[test]
    fn rga_insert_and_delete_round_trip() {
        let mut doc = CrdtDocument::new(node("a"), Limits::default());
        doc.local_rga_insert(vec!["items".into()], None, Value::from("first"))
            .unwrap();
        doc.local_rga_insert(vec!["items".into()], Some(0), Value::from("second"))
            .unwrap();
        let obj = doc.to_object();
        let items = obj.as_object().unwrap().get("items").unwrap();
        assert_eq!(
            items,
            &Value::Array(vec![Value::from("first"), Value::from("second")])
        );
        doc.local_rga_delete(vec!["items".into()], 0).unwrap();
        let obj = doc.to_object();
        let items = obj.as_object().unwrap().get("items").unwrap();
        assert_eq!(items, &Value::Array(vec![Value::from("second")]));
    }

    #[test]
    fn orset_add_remove_round_trip() {
        let mut doc = CrdtDocument::new(node("a"), Limits::default());
        doc.local_orset_add(vec!["tags".into()], Value::from("red"))
            .unwrap();
        doc.local_orset_add(vec!["tags".into()], Value::from("blue"))
            .unwrap();
        doc.local_orset_remove(vec!["tags".into()], Value::from("red"))
            .unwrap();
        let obj = doc.to_object();
        let tags = obj.as_object().unwrap().get("tags").unwrap();
        assert_eq!(tags, &Value::Array(vec![Value::from("blue")]));
    }

    #[test]
    fn applied_op_window_is_bounded() {
        let mut doc = CrdtDocument::new(node("a"), Limits::with_small_limits());
        for i in 0..20 {
            doc.local_set(vec![format!("k{i}")], Value::I64(i)).unwrap();
        }
        assert!(doc.applied.order.len() <= Limits::with_small_limits().applied_op_history);
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut doc = CrdtDocument::new(node("a"), Limits::default());
        assert!(doc.local_set(vec![], Value::I64(1)).is_err());
    }
}
