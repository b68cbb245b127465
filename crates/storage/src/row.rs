//! The stored row shape common to every shard store implementation.

use serde::{Deserialize, Serialize};
use verge_core::Value;

/// One stored row. `value` holds a serialized CRDT snapshot or raw
/// JSON, per the table's collection semantics — the shard store
/// itself is agnostic to which.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row id (the `docId`).
    pub id: String,
    /// Row payload.
    pub value: Value,
    /// Monotonically increasing per-document version.
    pub version: u64,
    /// Soft-delete flag; rows are tombstoned, never erased.
    pub deleted: bool,
    /// Server wall-clock creation time, epoch milliseconds.
    pub created_at: i64,
    /// Server wall-clock last-update time, epoch milliseconds.
    pub updated_at: i64,
}

impl Row {
    /// Construct a freshly created (non-deleted) row.
    pub fn new(id: impl Into<String>, value: Value, version: u64, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            value,
            version,
            deleted: false,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}
