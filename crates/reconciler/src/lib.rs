//! Client-side CRDT reconciler: keeps a local document in sync with a
//! server while offline, queuing local ops and replaying them (with
//! compaction) on reconnect.
//!
//! [`storage::ReconcilerStorage`] is the persistence seam for the
//! offline queue and per-collection watermarks; [`ServerLink`] is the
//! transport seam (no socket implementation lives in this crate —
//! that's an SDK/adapter concern). [`Reconciler`] ties both to a set
//! of live [`verge_crdt::CrdtDocument`]s.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod reconciler;
pub mod storage;

pub use reconciler::{ConflictEvent, QueuedOp, Reconciler, ServerLink};
pub use storage::{InMemoryStorage, ReconcilerStorage};

/// Current time in epoch milliseconds, for callers that don't already
/// have a clock reading handy.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
