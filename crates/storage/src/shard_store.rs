//! The `ShardStore` adapter contract and its embedded implementation.

use dashmap::DashMap;
use verge_core::{ErrorCode, VergeError, VergeResult};

use crate::row::Row;

/// Per-shard persistence contract. Any implementation honoring
/// per-batch atomicity for `batch_upsert`/`batch_delete` is a valid
/// shard store — the WAL in `verge-durability` is what protects writes
/// between commits, this trait only needs to guarantee that a single
/// batch either fully lands or fully doesn't.
pub trait ShardStore: Send + Sync {
    /// Atomically upsert every `(id, row)` pair into `table`.
    fn batch_upsert(&self, table: &str, rows: Vec<(String, Row)>) -> VergeResult<()>;

    /// Atomically delete every id in `ids` from `table` (tombstoning,
    /// not physical removal — callers pass already-tombstoned rows to
    /// `batch_upsert` instead; this is for rows the caller wants
    /// physically gone, e.g. post-GC).
    fn batch_delete(&self, table: &str, ids: &[String]) -> VergeResult<()>;

    /// Fetch one row by id.
    fn get(&self, table: &str, id: &str) -> VergeResult<Option<Row>>;

    /// List rows in a table, `id`-ordered, with offset/limit pagination.
    fn scan(&self, table: &str, limit: usize, offset: usize) -> VergeResult<Vec<Row>>;

    /// Flush any in-memory log pages to stable storage. A no-op for
    /// purely in-memory implementations.
    fn checkpoint(&self) -> VergeResult<()>;
}

/// The default, embedded `ShardStore`: one `DashMap` of tables, each a
/// `DashMap` of rows. Lock-free reads, per-table-entry locking on write.
#[derive(Debug, Default)]
pub struct InMemoryShardStore {
    tables: DashMap<String, DashMap<String, Row>>,
}

impl InMemoryShardStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShardStore for InMemoryShardStore {
    fn batch_upsert(&self, table: &str, rows: Vec<(String, Row)>) -> VergeResult<()> {
        let entry = self.tables.entry(table.to_string()).or_default();
        for (id, row) in rows {
            entry.insert(id, row);
        }
        Ok(())
    }

    fn batch_delete(&self, table: &str, ids: &[String]) -> VergeResult<()> {
        if let Some(entry) = self.tables.get(table) {
            for id in ids {
                entry.remove(id);
            }
        }
        Ok(())
    }

    fn get(&self, table: &str, id: &str) -> VergeResult<Option<Row>> {
        Ok(self.tables.get(table).and_then(|t| t.get(id).map(|r| r.clone())))
    }

    fn scan(&self, table: &str, limit: usize, offset: usize) -> VergeResult<Vec<Row>> {
        let Some(entry) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Row> = entry.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    fn checkpoint(&self) -> VergeResult<()> {
        Ok(())
    }
}

/// A table name failed the shared collection-name validation. Reuses
/// `ErrorCode::InvalidCollectionName` since table names are collection
/// names in this store.
pub fn check_table_name(name: &str) -> VergeResult<()> {
    verge_core::validate_collection_name(name)
        .map_err(|e| VergeError::validation(ErrorCode::InvalidCollectionName, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::Value;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = InMemoryShardStore::new();
        store
            .batch_upsert("docs", vec![("a".into(), Row::new("a", Value::I64(1), 1, 0))])
            .unwrap();
        let row = store.get("docs", "a").unwrap().unwrap();
        assert_eq!(row.value, Value::I64(1));
    }

    #[test]
    fn scan_is_id_ordered_and_paginated() {
        let store = InMemoryShardStore::new();
        for id in ["c", "a", "b"] {
            store
                .batch_upsert("docs", vec![(id.into(), Row::new(id, Value::Null, 1, 0))])
                .unwrap();
        }
        let page = store.scan("docs", 2, 0).unwrap();
        assert_eq!(page.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn delete_removes_row() {
        let store = InMemoryShardStore::new();
        store
            .batch_upsert("docs", vec![("a".into(), Row::new("a", Value::Null, 1, 0))])
            .unwrap();
        store.batch_delete("docs", &["a".to_string()]).unwrap();
        assert!(store.get("docs", "a").unwrap().is_none());
    }
}
