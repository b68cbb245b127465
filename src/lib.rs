//! # VergeDB
//!
//! An embedded, real-time collaborative document database: CRDT-backed
//! documents with REST-shaped reads/writes, WAL-first durability, live
//! subscriptions, presence, and a client-side offline reconciler.
//!
//! # Quick Start
//!
//! ```no_run
//! use vergedb::{Database, NodeId};
//!
//! fn main() -> vergedb::VergeResult<()> {
//!     let db = Database::in_memory(NodeId::new("server-1"));
//!
//!     // REST-shaped document writes
//!     db.replace_document("docs", "doc-1", serde_json::json!({"title": "hello"}).into(), None)?;
//!     let doc = db.get_document("docs", "doc-1")?;
//!     assert!(doc.is_some());
//!
//!     // Merge a field without clobbering the rest of the document
//!     db.patch_document("docs", "doc-1", serde_json::json!({"status": "draft"}).into(), None)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `verge-core` | Ids, the tagged `Value` type, vector clocks, error taxonomy, size limits |
//! | `verge-crdt` | Map/RGA/OR-Set CRDTs and the causal `Operation` log |
//! | `verge-storage` | Sharded row storage, read-through cache |
//! | `verge-durability` | Write-ahead log and crash recovery |
//! | `verge-concurrency` | Presence tracking for live collaboration |
//! | `verge-engine` | The embedded [`Database`] facade: write buffer, sync hub, tombstone GC |
//! | `verge-wire` | Client↔server message contract |
//! | `verge-reconciler` | Client-side offline queue and causal replay |
//!
//! # Architecture
//!
//! [`Database`] is the main entry point for an embedded server process.
//! It wires a shard pool, a WAL-backed write buffer, a read cache, and
//! a [`verge_engine::hub::SyncHub`] that owns live CRDT document state
//! and broadcasts mutations to subscribers. A client process embeds
//! `verge-reconciler` instead, keeping a local CRDT document in sync
//! with the server and queuing edits made while offline.
//!
//! Only this crate's re-exported surface is considered stable; the
//! `verge-*` crates underneath may change shape between releases.

pub use verge_core::{
    tie_break, validate_collection_name, ClockOrdering, CollectionName, DocId, ErrorCode, Limits,
    NameError, NodeId, OpId, Value, VectorClock, VergeError, VergeResult,
};
pub use verge_crdt::{CrdtDocument, ElementId, OpPayload, Operation, Tag};
pub use verge_engine::{
    database, sweep_tombstones, BroadcastEnvelope, BroadcastSink, Config, ConfigBuilder, CoreApi,
    Database, SyncHub, SyncLog, SyncLogEntry,
};
pub use verge_reconciler::{ConflictEvent, InMemoryStorage, QueuedOp, Reconciler, ReconcilerStorage, ServerLink};
pub use verge_wire::messages;
