//! Client↔server message contract, serde-tagged on `type`.
//!
//! These are data types only — no socket framing, no transport. An
//! adapter (WebSocket, in-process channel, whatever) is responsible
//! for turning bytes into one of these and back.

use serde::{Deserialize, Serialize};
use verge_core::Value;
use verge_crdt::Operation;

/// A snapshot of a CRDT document, as returned by `crdt_get` and used to
/// bootstrap a reconnecting client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrdtSnapshot {
    /// The document's materialized value.
    pub state: Value,
    /// The document's current vector clock, serialized.
    pub clock: Value,
    /// Monotonic version counter for the document.
    pub version: u64,
}

/// One entry in a `sync_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncChange {
    /// Row id within the collection.
    pub doc_id: String,
    /// `"insert" | "update" | "delete"`.
    pub operation: String,
    /// The row's value at the time of this change, absent for deletes.
    pub data: Option<Value>,
    /// Server timestamp the change was committed at.
    pub timestamp: i64,
}

/// One entry in a `batch_sync` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncOp {
    /// Client-assigned id, echoed back in the matching result.
    pub op_id: String,
    /// Collection the op applies to.
    pub collection: String,
    /// Document id.
    pub doc_id: String,
    /// The CRDT mutation.
    pub operation: Operation,
}

/// The result of one `batch_sync` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncResult {
    /// Echoes [`BatchSyncOp::op_id`].
    pub op_id: String,
    /// Whether the op was accepted.
    pub success: bool,
    /// Present when `success` is `true`.
    pub result: Option<Value>,
    /// Present when `success` is `false`: `{code, message}`.
    pub error: Option<ErrorPayload>,
}

/// The wire shape of a [`verge_core::VergeError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error code string (see `verge_core::ErrorCode::as_str`).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// A presence participant's position, sent with `presence_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Client-supplied user metadata.
    pub user_info: Option<Value>,
    /// Cursor position, if reported.
    pub cursor: Option<Value>,
    /// Selection range, if reported.
    pub selection: Option<Value>,
}

/// Every message a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a collection-scope feed.
    Subscribe {
        /// Collection to watch.
        collection: String,
    },
    /// Leave a collection-scope feed.
    Unsubscribe {
        /// Collection to stop watching.
        collection: String,
    },
    /// Join a single document's feed.
    SubscribeDoc {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
    },
    /// Leave a single document's feed.
    UnsubscribeDoc {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
    },
    /// Fetch the current CRDT snapshot of a document.
    CrdtGet {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
    },
    /// Apply a batch of CRDT operations to a document.
    CrdtOps {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Operations to apply, in the order given.
        operations: Vec<Operation>,
    },
    /// Convenience wrapper: set a scalar value at `path`.
    CrdtSet {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Path of map keys from the document root.
        path: Vec<String>,
        /// New value.
        value: Value,
    },
    /// Convenience wrapper: insert into a list at `path`.
    CrdtListInsert {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Path to the list.
        path: Vec<String>,
        /// Zero-based index to insert after, `None` for head.
        after_index: Option<usize>,
        /// Element value.
        value: Value,
    },
    /// Convenience wrapper: delete a list element at `path`.
    CrdtListDelete {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Path to the list.
        path: Vec<String>,
        /// Zero-based element index.
        index: usize,
    },
    /// Insert a new row, non-CRDT collection semantics.
    Insert {
        /// Target collection.
        collection: String,
        /// Row id.
        id: String,
        /// Row value.
        data: Value,
        /// Client-assigned write timestamp.
        timestamp: Option<i64>,
    },
    /// Replace a row's value outright.
    Update {
        /// Target collection.
        collection: String,
        /// Row id.
        id: String,
        /// New row value.
        data: Value,
        /// Client-assigned write timestamp.
        timestamp: Option<i64>,
    },
    /// Merge fields into an existing row's CRDT map.
    Merge {
        /// Target collection.
        collection: String,
        /// Row id.
        id: String,
        /// Fields to merge.
        fields: Value,
        /// Client-assigned write timestamp.
        timestamp: Option<i64>,
    },
    /// Tombstone a row.
    Delete {
        /// Target collection.
        collection: String,
        /// Row id.
        id: String,
        /// Client-assigned write timestamp.
        timestamp: Option<i64>,
    },
    /// Replay queued offline ops after reconnecting.
    BatchSync {
        /// The ops to replay, in client-submission order.
        operations: Vec<BatchSyncOp>,
    },
    /// Request everything committed to `collection` since `since`.
    Sync {
        /// Target collection.
        collection: String,
        /// Exclusive lower bound, server timestamp.
        since: i64,
    },
    /// Join a document's presence set.
    PresenceJoin {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Client-supplied user metadata.
        user: Value,
    },
    /// Leave a document's presence set.
    PresenceLeave {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
    },
    /// Report a cursor/selection update.
    PresenceCursor {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Cursor position, if reported.
        position: Option<Value>,
        /// Selection range, if reported.
        selection: Option<Value>,
    },
    /// Liveness check.
    Ping,
}

/// Every message a server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, immediately after a connection is accepted.
    Connected {
        /// Id assigned to this connection.
        client_id: String,
        /// Id of the server instance handling the connection.
        server_id: String,
    },
    /// Reply to `subscribe`.
    Subscribed {
        /// Collection now being watched.
        collection: String,
    },
    /// Reply to `unsubscribe`.
    Unsubscribed {
        /// Collection no longer being watched.
        collection: String,
    },
    /// Collection-scope change notification.
    Sync {
        /// Collection the change belongs to.
        collection: String,
        /// `"insert" | "update" | "delete"`.
        event: String,
        /// The row's value at the time of this change.
        data: Option<Value>,
        /// Server timestamp the change was committed at.
        timestamp: i64,
    },
    /// Reply to a `sync` request.
    SyncResponse {
        /// Collection queried.
        collection: String,
        /// All changes strictly after the requested `since`.
        changes: Vec<SyncChange>,
        /// New high-water mark for the next `sync` call.
        server_time: i64,
    },
    /// Reply to `crdt_get`.
    CrdtState {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// The snapshot.
        state: CrdtSnapshot,
    },
    /// Doc-scope CRDT op notification.
    CrdtSync {
        /// Collection the document belongs to.
        collection: String,
        /// Document id.
        doc_id: String,
        /// The op(s) that were just applied.
        operations: Vec<Operation>,
    },
    /// Reply to `insert`.
    InsertOk {
        /// Row id.
        id: String,
        /// New row version.
        version: u64,
    },
    /// Reply to `update`/`merge`.
    UpdateOk {
        /// Row id.
        id: String,
        /// New row version.
        version: u64,
    },
    /// Reply to `delete`.
    DeleteOk {
        /// Row id.
        id: String,
        /// New row version (post-tombstone).
        version: u64,
    },
    /// Reply to `batch_sync`.
    BatchSyncOk {
        /// Per-op results, in request order.
        results: Vec<BatchSyncResult>,
    },
    /// A presence participant's state changed (join, cursor, or
    /// synthetic leave from the idle sweep).
    PresenceChanged {
        /// Document id.
        doc_id: String,
        /// The participant whose state changed.
        node_id: String,
        /// `None` signals the participant left.
        presence: Option<PresencePayload>,
    },
    /// Reply to `ping`.
    Pong {
        /// Echoes the server's own clock at reply time, epoch millis.
        time: i64,
    },
    /// Any rejected request or server-side failure.
    Error {
        /// Human-readable detail.
        message: String,
        /// Stable error code, when the failure originated from a
        /// [`verge_core::VergeError`].
        code: Option<String>,
    },
}
