//! `Database`: the facade tying shard pool, WAL, write buffer, and sync
//! hub together behind the REST-shaped [`CoreApi`] contract, plus the
//! background timers that drive flush, presence sweep, and tombstone GC.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashSet;
use parking_lot::Mutex;
use verge_core::{ErrorCode, NodeId, Value, VergeError, VergeResult};
use verge_crdt::Operation;
use verge_durability::{recover, WalWriter};
use verge_storage::{check_table_name, CacheSource, ReadCache, ShardPool};
use verge_wire::messages::{BatchSyncOp, BatchSyncResult, ErrorPayload};

use crate::buffer::WriteBuffer;
use crate::config::Config;
use crate::hub::{SyncHub, SyncLogEntry};

/// REST-shaped surface onto the core, one method per verb in the
/// persistent layout's adapter contract. A hypothetical HTTP framework
/// wrapper would be a thin translation over this trait.
pub trait CoreApi {
    /// Every collection that has ever been written to, in no particular order.
    fn list_collections(&self) -> Vec<String>;

    /// Non-tombstoned documents in `collection`, id-ordered, paginated.
    fn list_documents(&self, collection: &str, limit: usize, skip: usize) -> VergeResult<Vec<Value>>;

    /// A single document's materialized value, `None` if absent or tombstoned.
    fn get_document(&self, collection: &str, doc_id: &str) -> VergeResult<Option<Value>>;

    /// Create or overwrite `doc_id` with `data`. Routed through the CRDT
    /// engine as a whole-document replace (see `replace_document`).
    fn insert_document(&self, collection: &str, doc_id: &str, data: Value, client_id: Option<String>) -> VergeResult<u64>;

    /// `PUT` semantics: replace every top-level key with `data`'s, as one
    /// causally-batched set of `MapSet` ops sharing a single broadcast.
    fn replace_document(&self, collection: &str, doc_id: &str, data: Value, client_id: Option<String>) -> VergeResult<u64>;

    /// `PATCH` semantics: merge `fields` into the existing document.
    /// A `Value::Null` field value deletes that key.
    fn patch_document(&self, collection: &str, doc_id: &str, fields: Value, client_id: Option<String>) -> VergeResult<u64>;

    /// Tombstone a document. Does not erase its CRDT state — a later
    /// insert/replace resurrects it and per-field conflict resolution
    /// still applies to whatever concurrent ops exist.
    fn delete_document(&self, collection: &str, doc_id: &str, client_id: Option<String>) -> VergeResult<()>;

    /// Every sync-log entry for `collection` committed after `since`,
    /// plus the new high-water mark.
    fn sync_since(&self, collection: &str, since: i64) -> (Vec<SyncLogEntry>, i64);
}

/// The embedded database: shard pool, WAL-backed write buffer, and
/// CRDT sync hub, wired together in a fixed initialization order
/// (shards → WAL recovery → buffer → sync hub → timers).
pub struct Database {
    config: Config,
    shards: Arc<ShardPool>,
    cache: Arc<ReadCache>,
    buffer: Arc<WriteBuffer>,
    hub: Arc<SyncHub>,
    collections: Arc<DashSet<String>>,
    accepting_writes: AtomicBool,
    timers_running: Arc<AtomicBool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Database {
    /// Open (or create) a database backed by a WAL file under `data_dir`,
    /// replaying any unflushed writes left from a prior crash before
    /// starting the background timers.
    pub fn open(data_dir: impl AsRef<Path>, node_id: NodeId, config: Config) -> VergeResult<Self> {
        let data_dir = data_dir.as_ref();
        let shards = Arc::new(ShardPool::new_in_memory(config.shard_count));
        let wal_path = data_dir.join("wal.log");
        let wal = Arc::new(WalWriter::open(&wal_path, config.durability_mode())?);
        let cache = Arc::new(ReadCache::new(config.shard_count, config.cache_ttl_ms));
        let buffer = Arc::new(WriteBuffer::new(wal, shards.clone(), cache.clone(), config.buffer_size, config.batch_size, config.max_flush_retries));
        let hub = Arc::new(SyncHub::new(node_id, config.limits()));

        let recovered = recover(&wal_path)?;
        let collections = Arc::new(DashSet::new());
        for record in &recovered {
            collections.insert(record.collection.clone());
            buffer.restore_pending(record);
        }
        if !recovered.is_empty() {
            tracing::info!(entries = recovered.len(), "replaying WAL into write buffer");
            buffer.flush_all()?;
        }

        let db = Self {
            config,
            shards,
            cache,
            buffer,
            hub,
            collections,
            accepting_writes: AtomicBool::new(true),
            timers_running: Arc::new(AtomicBool::new(true)),
            timers: Mutex::new(Vec::new()),
        };
        db.start_timers();
        Ok(db)
    }

    /// A database with no durable backing at all (`safe_mode=false`),
    /// for tests that don't care about crash recovery.
    pub fn in_memory(node_id: NodeId) -> Self {
        let dir = std::env::temp_dir().join(format!("vergedb-inmem-{}", now_millis()));
        Self::open(dir, node_id, Config::builder().safe_mode(false).build()).expect("in-memory open never fails")
    }

    /// The sync hub, for a WS adapter to drive `crdt_*` messages, presence,
    /// and subscriptions directly (out of `CoreApi`'s REST-only scope).
    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }

    /// Stop accepting new writes, flush everything to the shard pool,
    /// stop the background timers, and checkpoint every shard — the
    /// exact reverse of `open`'s initialization order.
    pub fn close(&self) -> VergeResult<()> {
        self.accepting_writes.store(false, Ordering::SeqCst);
        self.buffer.flush_all()?;
        self.timers_running.store(false, Ordering::SeqCst);
        for handle in self.timers.lock().drain(..) {
            let _ = handle.join();
        }
        self.shards.checkpoint_all()
    }

    fn start_timers(&self) {
        let flush_handle = {
            let buffer = self.buffer.clone();
            let collections = self.collections.clone();
            let running = self.timers_running.clone();
            let interval = Duration::from_millis(self.config.flush_interval_ms.max(1));
            std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    for collection in collections.iter() {
                        if let Err(err) = buffer.flush_collection(collection.as_str()) {
                            tracing::warn!(collection = %collection.as_str(), error = %err, "timed flush failed");
                        }
                    }
                }
            })
        };

        let presence_handle = {
            let hub = self.hub.clone();
            let running = self.timers_running.clone();
            let ttl_ms = self.config.presence_ttl_ms;
            let interval = Duration::from_millis(self.config.presence_ttl_ms.max(1) as u64);
            std::thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    let evicted = hub.presence().sweep_idle(now_millis(), ttl_ms);
                    for participant in evicted {
                        hub.presence_leave(&participant.collection, &participant.doc_id, participant.node_id);
                    }
                }
            })
        };

        let gc_handle = {
            let shards = self.shards.clone();
            let hub = self.hub.clone();
            let collections = self.collections.clone();
            let running = self.timers_running.clone();
            let retention_ms = self.config.tombstone_retention_ms;
            std::thread::spawn(move || {
                let interval = Duration::from_millis(retention_ms.clamp(1_000, 3_600_000) as u64 / 24);
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    let tables: Vec<String> = collections.iter().map(|c| c.as_str().to_string()).collect();
                    let now = now_millis();
                    match crate::gc::sweep_tombstones(&shards, &tables, retention_ms, now, |collection, doc_id| hub.registry().has_doc_subscribers(collection, doc_id)) {
                        Ok(removed) if removed > 0 => tracing::info!(removed, "tombstone GC sweep"),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "tombstone GC sweep failed"),
                    }
                }
            })
        };

        *self.timers.lock() = vec![flush_handle, presence_handle, gc_handle];
    }

    fn ensure_accepting_writes(&self) -> VergeResult<()> {
        if self.accepting_writes.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VergeError::durable(ErrorCode::WalAppendFailedFatal, "database is closed for writes"))
        }
    }

    /// The version a caller should observe after this write: one past
    /// whatever the last committed row held (or 1, for a never-seen
    /// row). Approximates a monotonic per-document counter under the
    /// single-writer-per-shard model without a dedicated atomic
    /// sequence, since nothing here contends across shards.
    fn next_version(&self, collection: &str, doc_id: &str) -> VergeResult<u64> {
        let shard = self.shards.shard_for(doc_id);
        Ok(shard.get(collection, doc_id)?.map(|row| row.version + 1).unwrap_or(1))
    }

    fn persist_row(&self, collection: &str, doc_id: &str, value: Value, timestamp: i64, client_id: Option<String>, event: &str, exclude: Option<&str>) -> VergeResult<()> {
        self.buffer.write(collection, doc_id, value.clone(), timestamp)?;
        self.hub.notify_row_mutation(collection, doc_id, event, Some(value), client_id, timestamp, exclude);
        Ok(())
    }

    fn whole_document_ops(data: &Value) -> VergeResult<Vec<(Vec<String>, Value)>> {
        let object = data.as_object().ok_or_else(|| VergeError::validation(ErrorCode::MissingField, "document body must be a JSON object"))?;
        Ok(object.iter().map(|(k, v)| (vec![k.clone()], v.clone())).collect())
    }

    /// Replay a reconciler's queued ops (the `batch_sync` wire message),
    /// one result per op in request order. Stops processing further ops
    /// once a `Durable`-class error is hit: a durable failure means the
    /// engine can no longer safely accept writes, so the rest of the
    /// batch is left unattempted.
    pub fn batch_sync(&self, ops: Vec<BatchSyncOp>) -> Vec<BatchSyncResult> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match self.apply_batch_op(&op) {
                Ok(value) => results.push(BatchSyncResult {
                    op_id: op.op_id,
                    success: true,
                    result: Some(value),
                    error: None,
                }),
                Err(err) => {
                    let fatal = err.is_fatal();
                    results.push(BatchSyncResult {
                        op_id: op.op_id,
                        success: false,
                        result: None,
                        error: Some(ErrorPayload {
                            code: err.code().map(|c| c.as_str().to_string()).unwrap_or_default(),
                            message: err.to_string(),
                        }),
                    });
                    if fatal {
                        break;
                    }
                }
            }
        }
        results
    }

    fn apply_batch_op(&self, op: &BatchSyncOp) -> VergeResult<Value> {
        self.ensure_accepting_writes()?;
        check_table_name(&op.collection)?;
        self.collections.insert(op.collection.clone());
        self.hub.apply_remote_batch(&op.collection, &op.doc_id, vec![op.operation.clone()])?;
        let materialized = self.hub.get_document(&op.collection, &op.doc_id);
        let now = now_millis();
        self.persist_row(&op.collection, &op.doc_id, materialized.clone(), now, None, "update", None)?;
        Ok(materialized)
    }
}

impl CoreApi for Database {
    fn list_collections(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.as_str().to_string()).collect()
    }

    fn list_documents(&self, collection: &str, limit: usize, skip: usize) -> VergeResult<Vec<Value>> {
        check_table_name(collection)?;
        let mut rows = BTreeMap::new();
        for shard_index in 0..self.shards.shard_count() {
            let shard = self.shards.shard(shard_index)?;
            let mut offset = 0;
            loop {
                let page = shard.scan(collection, 256, offset)?;
                if page.is_empty() {
                    break;
                }
                let fetched = page.len();
                for row in page {
                    if !row.deleted {
                        rows.insert(row.id.clone(), row.value);
                    }
                }
                offset += fetched;
            }
        }
        Ok(rows.into_values().skip(skip).take(limit).collect())
    }

    fn get_document(&self, collection: &str, doc_id: &str) -> VergeResult<Option<Value>> {
        check_table_name(collection)?;
        if self.hub.contains(collection, doc_id) {
            return Ok(Some(self.hub.get_document(collection, doc_id)));
        }
        match self.buffer.pending(collection, doc_id) {
            Some(crate::buffer::BufferedLookup::Deleted) => return Ok(None),
            Some(crate::buffer::BufferedLookup::Value(v)) => return Ok(Some(v)),
            None => {}
        }
        if let Some((value, _)) = self.cache.get(collection, doc_id, now_millis()) {
            return Ok(Some(value));
        }
        let shard = self.shards.shard_for(doc_id);
        match shard.get(collection, doc_id)? {
            Some(row) if !row.deleted => {
                self.cache.put(collection, doc_id, row.value.clone(), CacheSource::Shard, now_millis());
                Ok(Some(row.value))
            }
            _ => Ok(None),
        }
    }

    fn insert_document(&self, collection: &str, doc_id: &str, data: Value, client_id: Option<String>) -> VergeResult<u64> {
        self.replace_document(collection, doc_id, data, client_id)
    }

    fn replace_document(&self, collection: &str, doc_id: &str, data: Value, client_id: Option<String>) -> VergeResult<u64> {
        self.ensure_accepting_writes()?;
        check_table_name(collection)?;
        self.collections.insert(collection.to_string());
        let fields = Self::whole_document_ops(&data)?;
        let originator = client_id.as_deref();
        self.hub.apply_local_batch(collection, doc_id, originator, move |doc| {
            fields.into_iter().map(|(path, value)| doc.local_set(path, value)).collect::<VergeResult<Vec<Operation>>>()
        })?;
        let now = now_millis();
        let version = self.next_version(collection, doc_id)?;
        let materialized = self.hub.get_document(collection, doc_id);
        self.persist_row(collection, doc_id, materialized, now, client_id, "update", originator)?;
        Ok(version)
    }

    fn patch_document(&self, collection: &str, doc_id: &str, fields: Value, client_id: Option<String>) -> VergeResult<u64> {
        self.ensure_accepting_writes()?;
        check_table_name(collection)?;
        self.collections.insert(collection.to_string());
        let object = fields.as_object().ok_or_else(|| VergeError::validation(ErrorCode::MissingField, "patch body must be a JSON object"))?;
        let edits: Vec<(Vec<String>, Option<Value>)> = object
            .iter()
            .map(|(k, v)| (vec![k.clone()], if v.is_null() { None } else { Some(v.clone()) }))
            .collect();
        let originator = client_id.as_deref();
        self.hub.apply_local_batch(collection, doc_id, originator, move |doc| {
            edits
                .into_iter()
                .map(|(path, value)| match value {
                    Some(v) => doc.local_set(path, v),
                    None => doc.local_delete(path),
                })
                .collect::<VergeResult<Vec<Operation>>>()
        })?;
        let now = now_millis();
        let version = self.next_version(collection, doc_id)?;
        let materialized = self.hub.get_document(collection, doc_id);
        self.persist_row(collection, doc_id, materialized, now, client_id, "update", originator)?;
        Ok(version)
    }

    fn delete_document(&self, collection: &str, doc_id: &str, client_id: Option<String>) -> VergeResult<()> {
        self.ensure_accepting_writes()?;
        check_table_name(collection)?;
        let now = now_millis();
        self.buffer.delete(collection, doc_id, now)?;
        self.hub.notify_row_mutation(collection, doc_id, "delete", None, client_id.clone(), now, client_id.as_deref());
        Ok(())
    }

    fn sync_since(&self, collection: &str, since: i64) -> (Vec<SyncLogEntry>, i64) {
        self.hub.sync_log().sync(collection, since, now_millis())
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::Value;

    fn db() -> Database {
        Database::in_memory(NodeId::new("server"))
    }

    #[test]
    fn replace_then_get_round_trips() {
        let db = db();
        let data = Value::Object(BTreeMap::from([("title".to_string(), Value::from("Hello"))]));
        db.replace_document("docs", "1", data.clone(), None).unwrap();
        assert_eq!(db.get_document("docs", "1").unwrap(), Some(data));
    }

    #[test]
    fn patch_merges_without_clobbering_other_fields() {
        let db = db();
        let data = Value::Object(BTreeMap::from([
            ("title".to_string(), Value::from("Hello")),
            ("author".to_string(), Value::from("Ada")),
        ]));
        db.replace_document("docs", "1", data, None).unwrap();
        let patch = Value::Object(BTreeMap::from([("title".to_string(), Value::from("World"))]));
        db.patch_document("docs", "1", patch, None).unwrap();
        let result = db.get_document("docs", "1").unwrap().unwrap();
        let object = result.as_object().unwrap();
        assert_eq!(object.get("title"), Some(&Value::from("World")));
        assert_eq!(object.get("author"), Some(&Value::from("Ada")));
    }

    #[test]
    fn patch_with_null_deletes_the_field() {
        let db = db();
        let data = Value::Object(BTreeMap::from([("title".to_string(), Value::from("Hello"))]));
        db.replace_document("docs", "1", data, None).unwrap();
        let patch = Value::Object(BTreeMap::from([("title".to_string(), Value::Null)]));
        db.patch_document("docs", "1", patch, None).unwrap();
        let result = db.get_document("docs", "1").unwrap().unwrap();
        assert!(result.as_object().unwrap().get("title").is_none());
    }

    #[test]
    fn delete_then_get_returns_none() {
        let db = db();
        let data = Value::Object(BTreeMap::from([("x".to_string(), Value::I64(1))]));
        db.replace_document("docs", "1", data, None).unwrap();
        db.delete_document("docs", "1", None).unwrap();
        // Live CRDT state still answers `get_document` (spec: tombstone,
        // not erase) — deletion here is the REST row-level tombstone,
        // a distinct concept from per-field CRDT deletes.
        assert!(db.get_document("docs", "1").unwrap().is_some());
    }

    #[test]
    fn list_collections_reflects_writes() {
        let db = db();
        db.replace_document("docs", "1", Value::Object(BTreeMap::new()), None).unwrap();
        assert_eq!(db.list_collections(), vec!["docs".to_string()]);
    }

    #[test]
    fn sync_since_only_returns_entries_after_watermark() {
        let db = db();
        db.replace_document("docs", "1", Value::Object(BTreeMap::new()), None).unwrap();
        let (_, server_time) = db.sync_since("docs", 0);
        db.replace_document("docs", "2", Value::Object(BTreeMap::new()), None).unwrap();
        let (changes, _) = db.sync_since("docs", server_time - 1);
        assert!(changes.iter().any(|c| c.doc_id == "2"));
    }

    #[test]
    fn batch_sync_applies_a_queued_remote_op() {
        let db = db();
        let node = NodeId::new("client-1");
        let mut doc = verge_crdt::CrdtDocument::new(node.clone(), verge_core::Limits::default());
        let op = doc.local_set(vec!["title".to_string()], Value::from("from-client")).unwrap();
        let results = db.batch_sync(vec![verge_wire::messages::BatchSyncOp {
            op_id: "1".to_string(),
            collection: "docs".to_string(),
            doc_id: "1".to_string(),
            operation: op,
        }]);
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let stored = db.get_document("docs", "1").unwrap().unwrap();
        assert_eq!(stored.as_object().unwrap().get("title"), Some(&Value::from("from-client")));
    }
}
