//! The sync hub: owns live CRDT document state, the append-only sync
//! log, and fan-out to subscribers and presence participants.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use verge_concurrency::{PresenceManager, PresenceState, SubscriptionRegistry};
use verge_core::{ErrorCode, Limits, NodeId, Value, VergeError, VergeResult};
use verge_crdt::{CrdtDocument, Operation};

/// A fanned-out notification. Transport-agnostic: an adapter translates
/// this into its own wire format (e.g. `verge-wire::ServerMessage`).
#[derive(Debug, Clone)]
pub enum BroadcastEnvelope {
    /// Collection-scope summary of an accepted mutation.
    Collection {
        /// Collection the mutation landed in.
        collection: String,
        /// `"insert" | "update" | "delete"`.
        event: String,
        /// The row's new value, absent for deletes.
        data: Option<Value>,
        /// Server timestamp the mutation was committed at.
        timestamp: i64,
    },
    /// Doc-scope notification carrying the CRDT op(s) just applied.
    Doc {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// The operations that were just applied.
        operations: Vec<Operation>,
    },
    /// A presence participant changed; `None` means it left.
    Presence {
        /// Document id.
        doc_id: String,
        /// The node whose presence changed.
        node_id: NodeId,
        /// `None` on leave.
        presence: Option<PresenceState>,
    },
}

/// An opaque sink an external process-to-process bus can attach to.
/// The CRDT layer remains the convergence authority — no ordering is
/// assumed of whatever consumes this.
pub trait BroadcastSink: Send + Sync {
    /// Publish one envelope to the relay.
    fn publish(&self, envelope: &BroadcastEnvelope);
}

/// One entry in the append-only sync log.
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Collection the change belongs to.
    pub collection: String,
    /// Row id.
    pub doc_id: String,
    /// `"insert" | "update" | "delete"`.
    pub operation: String,
    /// The row's value at commit time, absent for deletes.
    pub data: Option<Value>,
    /// Originating client, if any (absent for REST/system writes).
    pub client_id: Option<String>,
    /// Server timestamp the change was committed at.
    pub server_timestamp: i64,
}

/// Process-wide, append-only log of committed mutations, replayed by
/// `sync(collection, since)`.
#[derive(Default)]
pub struct SyncLog {
    entries: Mutex<Vec<SyncLogEntry>>,
    next_seq: Mutex<u64>,
}

impl SyncLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry, assigning it the next sequence number.
    pub fn append(
        &self,
        collection: &str,
        doc_id: &str,
        operation: &str,
        data: Option<Value>,
        client_id: Option<String>,
        server_timestamp: i64,
    ) -> u64 {
        let mut seq_guard = self.next_seq.lock();
        let seq = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);
        self.entries.lock().push(SyncLogEntry {
            seq,
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            operation: operation.to_string(),
            data,
            client_id,
            server_timestamp,
        });
        seq
    }

    /// Every entry for `collection` committed strictly after `since`,
    /// plus the new high-water mark to pass on the next call.
    pub fn sync(&self, collection: &str, since: i64, now_ms: i64) -> (Vec<SyncLogEntry>, i64) {
        let entries = self.entries.lock();
        let changes: Vec<SyncLogEntry> = entries
            .iter()
            .filter(|e| e.collection == collection && e.server_timestamp > since)
            .cloned()
            .collect();
        (changes, now_ms)
    }
}

/// Owns live CRDT document state and drives fan-out.
///
/// One mutex per `(collection, docId)` serializes local-apply and
/// apply-remote for that document only — unrelated documents never
/// contend.
pub struct SyncHub {
    docs: DashMap<(String, String), Mutex<CrdtDocument>>,
    node_id: NodeId,
    limits: Limits,
    registry: SubscriptionRegistry<BroadcastEnvelope>,
    presence: PresenceManager,
    sync_log: SyncLog,
    sinks: Mutex<Vec<Arc<dyn BroadcastSink>>>,
}

impl SyncHub {
    /// A hub with no live documents and no subscribers.
    pub fn new(node_id: NodeId, limits: Limits) -> Self {
        Self {
            docs: DashMap::new(),
            node_id,
            limits,
            registry: SubscriptionRegistry::new(),
            presence: PresenceManager::new(),
            sync_log: SyncLog::new(),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Attach an external relay sink; every broadcast is also published
    /// to it.
    pub fn add_sink(&self, sink: Arc<dyn BroadcastSink>) {
        self.sinks.lock().push(sink);
    }

    /// Subscriber registry, for connection lifecycle management.
    pub fn registry(&self) -> &SubscriptionRegistry<BroadcastEnvelope> {
        &self.registry
    }

    /// Presence manager, for the idle sweep timer.
    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    /// Sync log, for REST's `sync` adapter surface.
    pub fn sync_log(&self) -> &SyncLog {
        &self.sync_log
    }

    fn doc_entry(&self, collection: &str, doc_id: &str) -> dashmap::mapref::one::RefMut<'_, (String, String), Mutex<CrdtDocument>> {
        let key = (collection.to_string(), doc_id.to_string());
        self.docs
            .entry(key)
            .or_insert_with(|| Mutex::new(CrdtDocument::new(self.node_id.clone(), self.limits.clone())))
    }

    /// Materialize a document's current value.
    pub fn get_document(&self, collection: &str, doc_id: &str) -> Value {
        self.doc_entry(collection, doc_id).lock().to_object()
    }

    /// Whether `(collection, docId)` already has live CRDT state,
    /// without the auto-vivification `doc_entry`/`get_document` do.
    /// Lets a caller distinguish "never written" from "written, happens
    /// to be empty".
    pub fn contains(&self, collection: &str, doc_id: &str) -> bool {
        self.docs.contains_key(&(collection.to_string(), doc_id.to_string()))
    }

    /// Serialize a document's full CRDT state (arena, clock, applied-op
    /// window) for cold storage. `CrdtDocument` already derives
    /// `Serialize`/`Deserialize`, so this is a thin wrapper rather than
    /// a dedicated method on the CRDT type itself. Returned as
    /// `serde_json::Value` rather than our own `Value` tagged union,
    /// since the document's internal `Value` fields would otherwise be
    /// wrapped twice and lose their shape on the way back in.
    pub fn snapshot(&self, collection: &str, doc_id: &str) -> VergeResult<serde_json::Value> {
        let doc = self.doc_entry(collection, doc_id);
        let doc = doc.lock();
        serde_json::to_value(&*doc).map_err(|e| VergeError::integrity(ErrorCode::BadPath, e.to_string()))
    }

    /// Replace a document's in-memory CRDT state with a previously
    /// captured snapshot, e.g. when warming the hub from cold storage
    /// after a restart. `Limits` is skipped by `CrdtDocument`'s own
    /// `Deserialize` impl and comes back as `Limits::default()`, which
    /// is why the hub constructs the document via `doc_entry` first and
    /// only replaces its arena/clock/applied-op state below rather than
    /// trusting the deserialized value outright.
    pub fn restore(&self, collection: &str, doc_id: &str, snapshot: serde_json::Value) -> VergeResult<()> {
        let mut restored: CrdtDocument =
            serde_json::from_value(snapshot).map_err(|e| VergeError::integrity(ErrorCode::BadPath, e.to_string()))?;
        restored.set_limits(self.limits.clone());
        let entry = self.doc_entry(collection, doc_id);
        *entry.lock() = restored;
        Ok(())
    }

    /// Apply a caller-supplied transform to a document's local CRDT
    /// state, broadcast the resulting op (excluding `originator`), and
    /// append a doc-scope sync-log-equivalent note.
    pub fn apply_local<F>(&self, collection: &str, doc_id: &str, originator: Option<&str>, mutate: F) -> VergeResult<Operation>
    where
        F: FnOnce(&mut CrdtDocument) -> VergeResult<Operation>,
    {
        let entry = self.doc_entry(collection, doc_id);
        let mut doc = entry.lock();
        let op = mutate(&mut doc)?;
        drop(doc);
        self.broadcast_doc(collection, doc_id, vec![op.clone()], originator);
        Ok(op)
    }

    /// Apply a caller-supplied transform that produces several
    /// causally-linked local ops at once (e.g. a REST `PUT` replacing
    /// every top-level key), broadcasting them together as a single
    /// doc-scope notification rather than one per field.
    pub fn apply_local_batch<F>(&self, collection: &str, doc_id: &str, originator: Option<&str>, mutate: F) -> VergeResult<Vec<Operation>>
    where
        F: FnOnce(&mut CrdtDocument) -> VergeResult<Vec<Operation>>,
    {
        let entry = self.doc_entry(collection, doc_id);
        let mut doc = entry.lock();
        let ops = mutate(&mut doc)?;
        drop(doc);
        if !ops.is_empty() {
            self.broadcast_doc(collection, doc_id, ops.clone(), originator);
        }
        Ok(ops)
    }

    /// Apply a batch of remote ops (e.g. from `crdt_ops` or a relay
    /// sink) and broadcast whichever ones actually changed state.
    pub fn apply_remote_batch(&self, collection: &str, doc_id: &str, ops: Vec<Operation>) -> VergeResult<usize> {
        let entry = self.doc_entry(collection, doc_id);
        let mut doc = entry.lock();
        let changed = doc.apply_remote_batch(ops.clone())?;
        drop(doc);
        if changed > 0 {
            self.broadcast_doc(collection, doc_id, ops, None);
        }
        Ok(changed)
    }

    fn broadcast_doc(&self, collection: &str, doc_id: &str, operations: Vec<Operation>, exclude: Option<&str>) {
        let envelope = BroadcastEnvelope::Doc {
            collection: collection.to_string(),
            doc_id: doc_id.to_string(),
            operations,
        };
        self.registry.broadcast_doc(collection, doc_id, envelope.clone(), exclude);
        self.publish_to_sinks(&envelope);
    }

    /// Notify collection-scope subscribers of an accepted row mutation
    /// (the §4.7 "collection-scope event containing the new state
    /// summary"), and record it in the sync log.
    pub fn notify_row_mutation(
        &self,
        collection: &str,
        doc_id: &str,
        event: &str,
        data: Option<Value>,
        client_id: Option<String>,
        timestamp: i64,
        exclude: Option<&str>,
    ) {
        self.sync_log.append(collection, doc_id, event, data.clone(), client_id, timestamp);
        let envelope = BroadcastEnvelope::Collection {
            collection: collection.to_string(),
            event: event.to_string(),
            data,
            timestamp,
        };
        self.registry.broadcast_collection(collection, envelope.clone(), exclude);
        self.publish_to_sinks(&envelope);
    }

    /// Record a presence join/cursor update and broadcast it to the
    /// document's subscribers.
    pub fn presence_update(&self, collection: &str, doc_id: &str, node_id: NodeId, state: PresenceState) {
        let envelope = BroadcastEnvelope::Presence { doc_id: doc_id.to_string(), node_id, presence: Some(state) };
        self.registry.broadcast_doc(collection, doc_id, envelope.clone(), None);
        self.publish_to_sinks(&envelope);
    }

    /// Broadcast a presence leave (explicit or from the idle sweep).
    pub fn presence_leave(&self, collection: &str, doc_id: &str, node_id: NodeId) {
        let envelope = BroadcastEnvelope::Presence { doc_id: doc_id.to_string(), node_id, presence: None };
        self.registry.broadcast_doc(collection, doc_id, envelope.clone(), None);
        self.publish_to_sinks(&envelope);
    }

    fn publish_to_sinks(&self, envelope: &BroadcastEnvelope) {
        for sink in self.sinks.lock().iter() {
            sink.publish(envelope);
        }
    }
}

/// Current wall-clock time, epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use verge_concurrency::Subscriber;

    struct Counter(AtomicUsize);

    impl Subscriber<BroadcastEnvelope> for Counter {
        fn send(&self, _message: BroadcastEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn id(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn doc_broadcast_reaches_doc_subscribers_not_excluded() {
        let hub = SyncHub::new(NodeId::new("server"), Limits::default());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        hub.registry().register(counter.clone());
        hub.registry().subscribe_doc("counter", "docs", "1");
        hub.apply_local("docs", "1", Some("counter"), |doc| doc.local_set(vec!["x".into()], Value::I64(1))).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0, "excluded originator must not be echoed");
        hub.apply_local("docs", "1", None, |doc| doc.local_set(vec!["y".into()], Value::I64(2))).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_log_replays_only_entries_after_watermark() {
        let log = SyncLog::new();
        log.append("docs", "a", "insert", Some(Value::I64(1)), None, 10);
        log.append("docs", "b", "insert", Some(Value::I64(2)), None, 20);
        let (changes, _) = log.sync("docs", 10, 100);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].doc_id, "b");
    }

    #[test]
    fn snapshot_restore_round_trips_document_state() {
        let hub = SyncHub::new(NodeId::new("server"), Limits::default());
        hub.apply_local("docs", "1", None, |doc| doc.local_set(vec!["x".into()], Value::I64(7))).unwrap();
        let snapshot = hub.snapshot("docs", "1").unwrap();

        let other = SyncHub::new(NodeId::new("server"), Limits::default());
        other.restore("docs", "1", snapshot).unwrap();
        assert_eq!(other.get_document("docs", "1"), hub.get_document("docs", "1"));
    }
}
