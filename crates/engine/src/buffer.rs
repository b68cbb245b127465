//! Per-collection write buffer: WAL-first, then in-memory buffer, then
//! read-through cache, with periodic and overflow-triggered flush to
//! the shard pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use verge_core::{ErrorCode, VergeError, VergeResult, Value};
use verge_durability::{WalOp, WalRecord, WalWriter};
use verge_storage::{check_table_name, CacheSource, ReadCache, Row, ShardPool};

/// One buffered mutation awaiting a shard commit.
#[derive(Debug, Clone)]
struct PendingWrite {
    id: String,
    op: WalOp,
    timestamp: i64,
}

/// What a read-after-write lookup against the buffer found.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferedLookup {
    /// The most recent buffered write for this id was an upsert.
    Value(Value),
    /// The most recent buffered write for this id was a delete.
    Deleted,
}

/// The write path described in the component design: append to the
/// WAL, buffer in memory, write through to the cache, flush on
/// overflow or timer.
pub struct WriteBuffer {
    wal: Arc<WalWriter>,
    shards: Arc<ShardPool>,
    cache: Arc<ReadCache>,
    collections: DashMap<String, Mutex<VecDeque<PendingWrite>>>,
    buffer_size: usize,
    batch_size: usize,
    max_retries: usize,
}

impl WriteBuffer {
    /// Build a write buffer over shared WAL/shard/cache handles.
    pub fn new(
        wal: Arc<WalWriter>,
        shards: Arc<ShardPool>,
        cache: Arc<ReadCache>,
        buffer_size: usize,
        batch_size: usize,
        max_retries: usize,
    ) -> Self {
        Self {
            wal,
            shards,
            cache,
            collections: DashMap::new(),
            buffer_size,
            batch_size,
            max_retries,
        }
    }

    /// Push a write through the WAL, the in-memory buffer, and the
    /// read cache, for the given `(collection, id)`. Triggers an
    /// immediate flush of that collection if the buffer crosses
    /// `buffer_size`.
    pub fn write(&self, collection: &str, id: &str, value: Value, timestamp: i64) -> VergeResult<()> {
        check_table_name(collection)?;
        self.append(collection, id, WalOp::Upsert { value: value.clone() }, timestamp)?;
        self.cache.put(collection, id, value, CacheSource::Buffered, timestamp);
        Ok(())
    }

    /// Buffer a tombstone for `(collection, id)`.
    pub fn delete(&self, collection: &str, id: &str, timestamp: i64) -> VergeResult<()> {
        check_table_name(collection)?;
        self.append(collection, id, WalOp::Delete, timestamp)?;
        self.cache.invalidate(collection, id);
        Ok(())
    }

    /// Push a WAL record recovered at startup straight into the
    /// in-memory buffer without re-appending it to the WAL (it's
    /// already there). Used by crash recovery to replay the WAL and
    /// push each entry back into its collection's buffer.
    pub fn restore_pending(&self, record: &WalRecord) {
        let queue = self.collections.entry(record.collection.clone()).or_default();
        queue.lock().push_back(PendingWrite {
            id: record.id.clone(),
            op: record.op.clone(),
            timestamp: record.timestamp,
        });
        match &record.op {
            WalOp::Upsert { value } => self.cache.put(&record.collection, &record.id, value.clone(), CacheSource::Buffered, record.timestamp),
            WalOp::Delete => self.cache.invalidate(&record.collection, &record.id),
        }
    }

    fn append(&self, collection: &str, id: &str, op: WalOp, timestamp: i64) -> VergeResult<()> {
        let record = WalRecord { collection: collection.to_string(), id: id.to_string(), op: op.clone(), timestamp };
        self.wal.append(&record)?;
        let queue = self.collections.entry(collection.to_string()).or_default();
        let mut queue = queue.lock();
        queue.push_back(PendingWrite { id: id.to_string(), op, timestamp });
        let should_flush = queue.len() >= self.buffer_size;
        drop(queue);
        if should_flush {
            self.flush_collection(collection)?;
        }
        Ok(())
    }

    /// Read-after-write lookup: the most recent buffered write for
    /// `(collection, id)`, if any is still pending.
    pub fn pending(&self, collection: &str, id: &str) -> Option<BufferedLookup> {
        let queue = self.collections.get(collection)?;
        let queue = queue.lock();
        queue
            .iter()
            .rev()
            .find(|w| w.id == id)
            .map(|w| match &w.op {
                WalOp::Upsert { value } => BufferedLookup::Value(value.clone()),
                WalOp::Delete => BufferedLookup::Deleted,
            })
    }

    /// Drain up to `batch_size` entries for `collection`, group by
    /// shard, and commit each shard's batch atomically. Returns the
    /// number of entries committed.
    pub fn flush_collection(&self, collection: &str) -> VergeResult<usize> {
        let Some(queue_entry) = self.collections.get(collection) else { return Ok(0) };
        let drained: Vec<PendingWrite> = {
            let mut queue = queue_entry.lock();
            let n = queue.len().min(self.batch_size);
            queue.drain(..n).collect()
        };
        if drained.is_empty() {
            return Ok(0);
        }
        match self.commit_with_retry(collection, &drained) {
            Ok(()) => {
                tracing::debug!(collection, committed = drained.len(), "flushed write buffer");
                Ok(drained.len())
            }
            Err(err) => {
                // Put the entries back at the head so the next flush
                // attempt (or recovery) can retry them; the WAL still
                // has them regardless.
                let mut queue = queue_entry.lock();
                for write in drained.into_iter().rev() {
                    queue.push_front(write);
                }
                Err(err)
            }
        }
    }

    /// Flush every collection, then truncate the WAL if every
    /// collection's buffer drained to empty. One shared WAL file backs
    /// every collection's buffer, so truncation is only safe once
    /// nothing anywhere is still pending.
    pub fn flush_all(&self) -> VergeResult<usize> {
        let mut total = 0;
        for entry in self.collections.iter() {
            total += self.flush_collection(entry.key())?;
        }
        let all_empty = self.collections.iter().all(|e| e.value().lock().is_empty());
        if all_empty {
            self.wal.truncate()?;
        }
        Ok(total)
    }

    fn commit_with_retry(&self, collection: &str, writes: &[PendingWrite]) -> VergeResult<()> {
        let mut grouped: std::collections::HashMap<usize, Vec<&PendingWrite>> = std::collections::HashMap::new();
        for write in writes {
            grouped.entry(self.shards.shard_index(&write.id)).or_default().push(write);
        }
        let mut delay = Duration::from_millis(50);
        for attempt in 0..=self.max_retries {
            match self.commit_once(collection, &grouped) {
                Ok(()) => return Ok(()),
                Err(err) if attempt == self.max_retries => return Err(err),
                Err(err) => {
                    tracing::warn!(collection, attempt, error = %err, "shard commit failed, retrying");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
        unreachable!("loop always returns by the final attempt")
    }

    fn commit_once(&self, collection: &str, grouped: &std::collections::HashMap<usize, Vec<&PendingWrite>>) -> VergeResult<()> {
        for (&shard_index, writes) in grouped {
            let shard = self.shards.shard(shard_index)?;
            let mut upserts = Vec::new();
            let mut deletes = Vec::new();
            for write in writes {
                match &write.op {
                    WalOp::Upsert { value } => {
                        upserts.push((write.id.clone(), Row::new(write.id.clone(), value.clone(), 0, write.timestamp)));
                    }
                    WalOp::Delete => deletes.push(write.id.clone()),
                }
            }
            if !upserts.is_empty() {
                shard.batch_upsert(collection, upserts).map_err(|e| {
                    VergeError::durable(ErrorCode::ShardCommitViolatedAtomicity, e.to_string())
                })?;
            }
            if !deletes.is_empty() {
                shard.batch_delete(collection, &deletes).map_err(|e| {
                    VergeError::durable(ErrorCode::ShardCommitViolatedAtomicity, e.to_string())
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_durability::DurabilityMode;

    fn buffer(buffer_size: usize, batch_size: usize) -> (WriteBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wal = Arc::new(WalWriter::open(dir.path().join("wal.log"), DurabilityMode::Strict).unwrap());
        let shards = Arc::new(ShardPool::new_in_memory(4));
        let cache = Arc::new(ReadCache::new(4, 60_000));
        (WriteBuffer::new(wal, shards, cache, buffer_size, batch_size, 3), dir)
    }

    #[test]
    fn write_is_visible_through_pending_before_flush() {
        let (buf, _dir) = buffer(100, 10);
        buf.write("docs", "a", Value::I64(1), 0).unwrap();
        assert_eq!(buf.pending("docs", "a"), Some(BufferedLookup::Value(Value::I64(1))));
    }

    #[test]
    fn overflow_triggers_automatic_flush() {
        let (buf, _dir) = buffer(2, 10);
        buf.write("docs", "a", Value::I64(1), 0).unwrap();
        buf.write("docs", "b", Value::I64(2), 0).unwrap();
        assert_eq!(buf.pending("docs", "a"), None);
        assert_eq!(buf.pending("docs", "b"), None);
    }

    #[test]
    fn flush_all_truncates_wal_once_every_buffer_drains() {
        let (buf, dir) = buffer(100, 10);
        buf.write("docs", "a", Value::I64(1), 0).unwrap();
        buf.flush_all().unwrap();
        let recovered = verge_durability::recover(dir.path().join("wal.log")).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn delete_invalidates_cache_and_is_visible_as_pending() {
        let (buf, _dir) = buffer(100, 10);
        buf.write("docs", "a", Value::I64(1), 0).unwrap();
        buf.delete("docs", "a", 1).unwrap();
        assert_eq!(buf.pending("docs", "a"), Some(BufferedLookup::Deleted));
    }

    #[test]
    fn restored_pending_entries_flush_like_fresh_writes() {
        let (buf, _dir) = buffer(100, 10);
        buf.restore_pending(&WalRecord {
            collection: "docs".into(),
            id: "a".into(),
            op: WalOp::Upsert { value: Value::I64(9) },
            timestamp: 0,
        });
        assert_eq!(buf.pending("docs", "a"), Some(BufferedLookup::Value(Value::I64(9))));
        assert_eq!(buf.flush_all().unwrap(), 1);
    }
}
