//! The reconciler itself: local documents, the offline op queue, and
//! the reconnect sequence (sync, compact, drain).

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use verge_core::{Limits, NodeId, Value, VergeResult};
use verge_crdt::{CrdtDocument, Operation, OpPayload};
use verge_wire::messages::{BatchSyncOp, BatchSyncResult, SyncChange};

use crate::storage::ReconcilerStorage;

/// A locally-generated op that hasn't been confirmed by the server
/// yet, along with enough context to replay it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedOp {
    /// The mutation itself.
    pub op: Operation,
    /// Collection the op applies to.
    pub collection: String,
    /// Document the op applies to.
    pub doc_id: String,
    /// Local clock reading when the op was enqueued.
    pub enqueued_at: i64,
}

/// A queued op the server rejected on replay, surfaced to the caller
/// so it can be shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEvent {
    /// The rejected op's id, as submitted in the `batch_sync` request.
    pub op_id: String,
    /// Collection the op applied to.
    pub collection: String,
    /// Document the op applied to.
    pub doc_id: String,
    /// Server-supplied failure detail.
    pub message: String,
    /// Server-supplied stable error code, if any.
    pub code: Option<String>,
}

/// Decouples the reconciler from any concrete transport. No socket or
/// HTTP implementation lives in this crate; an adapter wires a real
/// connection to this trait.
pub trait ServerLink: Send + Sync {
    /// Fetch every change committed to `collection` strictly after
    /// `since`, plus the new high-water mark to pass next time.
    fn sync(&self, collection: &str, since: i64) -> VergeResult<(Vec<SyncChange>, i64)>;
    /// Replay a batch of queued ops, in order, returning one result
    /// per op.
    fn batch_sync(&self, ops: Vec<BatchSyncOp>) -> VergeResult<Vec<BatchSyncResult>>;
}

fn queue_key(collection: &str, op_id: &str) -> String {
    format!("queue/{collection}/{op_id}")
}

fn watermark_key(collection: &str) -> String {
    format!("watermark/{collection}")
}

/// Client-side reconciler: one per local replica. Generic over the
/// storage adapter so a host can swap in whatever persistence its
/// platform offers.
pub struct Reconciler<S: ReconcilerStorage> {
    node_id: NodeId,
    limits: Limits,
    storage: S,
    docs: DashMap<(String, String), Mutex<CrdtDocument>>,
    queue: Mutex<VecDeque<QueuedOp>>,
    watermarks: DashMap<String, i64>,
    conflicts: Mutex<Vec<ConflictEvent>>,
}

impl<S: ReconcilerStorage> Reconciler<S> {
    /// Build a reconciler, restoring any queued ops and watermarks
    /// left over from a previous session.
    pub fn new(node_id: NodeId, limits: Limits, storage: S) -> VergeResult<Self> {
        let queue = VecDeque::new();
        let watermarks = DashMap::new();
        let reconciler = Self {
            node_id,
            limits,
            storage,
            docs: DashMap::new(),
            queue: Mutex::new(queue),
            watermarks,
            conflicts: Mutex::new(Vec::new()),
        };
        reconciler.restore()?;
        Ok(reconciler)
    }

    fn restore(&self) -> VergeResult<()> {
        let mut restored = Vec::new();
        for key in self.storage.keys("queue/")? {
            if let Some(bytes) = self.storage.get(&key)? {
                if let Ok(queued) = serde_json::from_slice::<QueuedOp>(&bytes) {
                    restored.push(queued);
                }
            }
        }
        restored.sort_by_key(|q| q.enqueued_at);
        *self.queue.lock() = restored.into();

        for key in self.storage.keys("watermark/")? {
            if let Some(bytes) = self.storage.get(&key)? {
                if let Ok(since) = serde_json::from_slice::<i64>(&bytes) {
                    if let Some(collection) = key.strip_prefix("watermark/") {
                        self.watermarks.insert(collection.to_string(), since);
                    }
                }
            }
        }
        Ok(())
    }

    fn document_entry(&self, collection: &str, doc_id: &str) -> dashmap::mapref::one::RefMut<'_, (String, String), Mutex<CrdtDocument>> {
        let key = (collection.to_string(), doc_id.to_string());
        self.docs
            .entry(key)
            .or_insert_with(|| Mutex::new(CrdtDocument::new(self.node_id.clone(), self.limits.clone())))
    }

    /// Materialize a local document's current value.
    pub fn document(&self, collection: &str, doc_id: &str) -> Value {
        self.document_entry(collection, doc_id).lock().to_object()
    }

    /// Apply a locally-originated mutation. If `connected` is `false`
    /// the op is also enqueued (and persisted) for later replay.
    pub fn local_edit<F>(&self, collection: &str, doc_id: &str, connected: bool, enqueued_at: i64, mutate: F) -> VergeResult<Operation>
    where
        F: FnOnce(&mut CrdtDocument) -> VergeResult<Operation>,
    {
        let entry = self.document_entry(collection, doc_id);
        let op = {
            let mut doc = entry.lock();
            mutate(&mut doc)?
        };
        if !connected {
            self.enqueue(collection, doc_id, op.clone(), enqueued_at)?;
        }
        Ok(op)
    }

    fn enqueue(&self, collection: &str, doc_id: &str, op: Operation, enqueued_at: i64) -> VergeResult<()> {
        let queued = QueuedOp {
            op,
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            enqueued_at,
        };
        let bytes = serde_json::to_vec(&queued)
            .map_err(|e| verge_core::VergeError::validation(verge_core::ErrorCode::MissingField, e.to_string()))?;
        self.storage.set(&queue_key(collection, &queued.op.op_id.to_string()), bytes)?;
        self.queue.lock().push_back(queued);
        Ok(())
    }

    /// The full reconnect sequence: sync each subscribed collection
    /// and merge the results, compact the offline queue, then drain it
    /// via `batch_sync`.
    pub fn reconnect(&self, server: &dyn ServerLink, collections: &[String]) -> VergeResult<Vec<ConflictEvent>> {
        for collection in collections {
            self.sync_collection(server, collection)?;
        }
        self.compact_queue()?;
        self.drain_and_sync(server)
    }

    fn sync_collection(&self, server: &dyn ServerLink, collection: &str) -> VergeResult<()> {
        let since = self.watermarks.get(collection).map(|w| *w).unwrap_or(0);
        let (changes, server_time) = server.sync(collection, since)?;
        for change in &changes {
            if let Some(data) = &change.data {
                self.merge_sync_change(collection, &change.doc_id, data)?;
            }
        }
        self.watermarks.insert(collection.to_string(), server_time);
        let bytes = serde_json::to_vec(&server_time)
            .map_err(|e| verge_core::VergeError::validation(verge_core::ErrorCode::MissingField, e.to_string()))?;
        self.storage.set(&watermark_key(collection), bytes)?;
        Ok(())
    }

    /// Merge a materialized row (as returned by `sync`, not a raw CRDT
    /// op) into the local document, one `local_set` per top-level
    /// field — the same whole-document-replace technique a REST PUT
    /// uses server-side. `sync` results carry row data, not
    /// `Operation`s, so there's nothing to feed `apply_remote_batch`
    /// here; that path is reserved for `crdt_sync`, which does carry
    /// real ops.
    fn merge_sync_change(&self, collection: &str, doc_id: &str, data: &Value) -> VergeResult<()> {
        let Some(object) = data.as_object() else { return Ok(()) };
        let entry = self.document_entry(collection, doc_id);
        let mut doc = entry.lock();
        for (key, value) in object {
            doc.local_set(vec![key.clone()], value.clone())?;
        }
        Ok(())
    }

    /// Apply a batch of genuine remote CRDT ops to a local document
    /// (the `crdt_sync` path, as opposed to row-level `sync`).
    pub fn apply_remote_ops(&self, collection: &str, doc_id: &str, ops: Vec<Operation>) -> VergeResult<usize> {
        let entry = self.document_entry(collection, doc_id);
        entry.lock().apply_remote_batch(ops)
    }

    /// Compact the offline queue: for successive `map_set`/`map_delete`
    /// ops on the same `(docId, path)`, keep only the latest; RGA and
    /// OR-Set ops are always preserved in order since there's no
    /// single "latest" value to collapse to.
    pub fn compact_queue(&self) -> VergeResult<()> {
        let mut queue = self.queue.lock();
        let mut latest_map_index: std::collections::HashMap<(String, Vec<String>), usize> = std::collections::HashMap::new();
        for (index, queued) in queue.iter().enumerate() {
            if matches!(queued.op.payload, OpPayload::MapSet { .. } | OpPayload::MapDelete { .. }) {
                let key = (queued.doc_id.clone(), queued.op.payload.path().to_vec());
                latest_map_index.insert(key, index);
            }
        }
        let mut keep = vec![true; queue.len()];
        for (index, queued) in queue.iter().enumerate() {
            if matches!(queued.op.payload, OpPayload::MapSet { .. } | OpPayload::MapDelete { .. }) {
                let key = (queued.doc_id.clone(), queued.op.payload.path().to_vec());
                if latest_map_index.get(&key) != Some(&index) {
                    keep[index] = false;
                }
            }
        }
        let dropped: Vec<QueuedOp> = queue
            .iter()
            .enumerate()
            .filter(|(i, _)| !keep[*i])
            .map(|(_, q)| q.clone())
            .collect();
        for queued in &dropped {
            self.storage.delete(&queue_key(&queued.collection, &queued.op.op_id.to_string()))?;
        }
        let compacted: VecDeque<QueuedOp> = queue
            .iter()
            .enumerate()
            .filter(|(i, _)| keep[*i])
            .map(|(_, q)| q.clone())
            .collect();
        *queue = compacted;
        Ok(())
    }

    /// Drain the offline queue via `batch_sync`, dropping every
    /// attempted op from the queue afterward (rejected ops are
    /// server-recorded, not retried) and collecting conflict events
    /// for the ones that failed.
    pub fn drain_and_sync(&self, server: &dyn ServerLink) -> VergeResult<Vec<ConflictEvent>> {
        let drained: Vec<QueuedOp> = self.queue.lock().drain(..).collect();
        if drained.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<BatchSyncOp> = drained
            .iter()
            .map(|q| BatchSyncOp {
                op_id: q.op.op_id.to_string(),
                collection: q.collection.clone(),
                doc_id: q.doc_id.clone(),
                operation: q.op.clone(),
            })
            .collect();
        let results = server.batch_sync(batch)?;

        let mut events = Vec::new();
        for queued in &drained {
            self.storage.delete(&queue_key(&queued.collection, &queued.op.op_id.to_string()))?;
        }
        for result in results {
            if !result.success {
                let queued = drained.iter().find(|q| q.op.op_id.to_string() == result.op_id);
                let (collection, doc_id) = queued
                    .map(|q| (q.collection.clone(), q.doc_id.clone()))
                    .unwrap_or_default();
                let event = ConflictEvent {
                    op_id: result.op_id,
                    collection,
                    doc_id,
                    message: result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
                    code: result.error.map(|e| e.code),
                };
                events.push(event.clone());
                self.conflicts.lock().push(event);
            }
        }
        Ok(events)
    }

    /// Return and clear every conflict event accumulated so far.
    pub fn drain_conflicts(&self) -> Vec<ConflictEvent> {
        std::mem::take(&mut *self.conflicts.lock())
    }

    /// Number of ops currently queued for replay.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::Mutex as StdMutex;
    use verge_wire::messages::ErrorPayload;

    struct FakeServer {
        sync_reply: StdMutex<Vec<(Vec<SyncChange>, i64)>>,
        batch_reply: StdMutex<Vec<BatchSyncResult>>,
    }

    impl ServerLink for FakeServer {
        fn sync(&self, _collection: &str, _since: i64) -> VergeResult<(Vec<SyncChange>, i64)> {
            Ok(self.sync_reply.lock().unwrap().pop().unwrap_or((Vec::new(), 0)))
        }

        fn batch_sync(&self, ops: Vec<BatchSyncOp>) -> VergeResult<Vec<BatchSyncResult>> {
            let mut reply = self.batch_reply.lock().unwrap().clone();
            if reply.is_empty() {
                reply = ops
                    .iter()
                    .map(|op| BatchSyncResult { op_id: op.op_id.clone(), success: true, result: None, error: None })
                    .collect();
            }
            Ok(reply)
        }
    }

    fn reconciler() -> Reconciler<InMemoryStorage> {
        Reconciler::new(NodeId::new("client-1"), Limits::default(), InMemoryStorage::new()).unwrap()
    }

    #[test]
    fn local_edit_while_disconnected_enqueues_the_op() {
        let r = reconciler();
        r.local_edit("docs", "a", false, 0, |doc| doc.local_set(vec!["title".into()], Value::String("hi".into()))).unwrap();
        assert_eq!(r.queue_len(), 1);
        assert_eq!(r.document("docs", "a").as_object().unwrap().get("title").unwrap(), &Value::String("hi".into()));
    }

    #[test]
    fn local_edit_while_connected_does_not_enqueue() {
        let r = reconciler();
        r.local_edit("docs", "a", true, 0, |doc| doc.local_set(vec!["title".into()], Value::String("hi".into()))).unwrap();
        assert_eq!(r.queue_len(), 0);
    }

    #[test]
    fn compact_queue_keeps_only_latest_map_set_per_path() {
        let r = reconciler();
        r.local_edit("docs", "a", false, 0, |doc| doc.local_set(vec!["title".into()], Value::String("one".into()))).unwrap();
        r.local_edit("docs", "a", false, 1, |doc| doc.local_set(vec!["title".into()], Value::String("two".into()))).unwrap();
        r.compact_queue().unwrap();
        assert_eq!(r.queue_len(), 1);
    }

    #[test]
    fn compact_queue_preserves_rga_ops_in_order() {
        let r = reconciler();
        r.local_edit("docs", "a", false, 0, |doc| doc.local_rga_insert(vec!["items".into()], None, Value::String("x".into()))).unwrap();
        r.local_edit("docs", "a", false, 1, |doc| doc.local_rga_insert(vec!["items".into()], None, Value::String("y".into()))).unwrap();
        r.compact_queue().unwrap();
        assert_eq!(r.queue_len(), 2);
    }

    #[test]
    fn drain_and_sync_surfaces_a_conflict_event_for_a_rejected_op() {
        let r = reconciler();
        r.local_edit("docs", "a", false, 0, |doc| doc.local_set(vec!["title".into()], Value::String("hi".into()))).unwrap();
        let op_id = r.queue.lock().front().unwrap().op.op_id.to_string();
        let server = FakeServer {
            sync_reply: StdMutex::new(Vec::new()),
            batch_reply: StdMutex::new(vec![BatchSyncResult {
                op_id,
                success: false,
                result: None,
                error: Some(ErrorPayload { code: "conflict".into(), message: "rejected".into() }),
            }]),
        };
        let events = r.drain_and_sync(&server).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(r.queue_len(), 0);
    }

    #[test]
    fn reconnect_merges_sync_changes_into_the_local_document() {
        let r = reconciler();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("title".to_string(), Value::String("from-server".into()));
        let server = FakeServer {
            sync_reply: StdMutex::new(vec![(
                vec![SyncChange { doc_id: "a".into(), operation: "update".into(), data: Some(Value::Object(fields)), timestamp: 5 }],
                5,
            )]),
            batch_reply: StdMutex::new(Vec::new()),
        };
        r.reconnect(&server, &["docs".to_string()]).unwrap();
        assert_eq!(r.document("docs", "a").as_object().unwrap().get("title").unwrap(), &Value::String("from-server".into()));
    }
}
