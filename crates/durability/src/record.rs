//! The WAL record shape: one line-delimited JSON object per buffered
//! write.

use serde::{Deserialize, Serialize};
use verge_core::Value;

/// What a [`WalRecord`] does to `(collection, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    /// Replace the row's value.
    Upsert {
        /// New value.
        value: Value,
    },
    /// Tombstone the row.
    Delete,
}

/// One WAL entry: `{collection, id, op, value, timestamp}`,
/// serialized as a single line of JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Collection the row belongs to.
    pub collection: String,
    /// Row id (`docId`).
    pub id: String,
    /// The mutation.
    #[serde(flatten)]
    pub op: WalOp,
    /// Client- or server-assigned write timestamp, epoch milliseconds.
    pub timestamp: i64,
}

impl WalRecord {
    /// Serialize as a single line (no embedded newline — the wire
    /// format is one JSON object per line).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a single line back into a record.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_a_line() {
        let record = WalRecord {
            collection: "docs".into(),
            id: "a".into(),
            op: WalOp::Upsert { value: Value::I64(1) },
            timestamp: 42,
        };
        let line = record.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(WalRecord::from_line(&line).unwrap(), record);
    }
}
