//! Tombstone GC sweep.

use verge_core::VergeResult;
use verge_storage::ShardPool;

/// Physically remove shard rows tombstoned for longer than
/// `retention_ms` that currently have no live doc-scope subscriber.
///
/// This is a conservative stand-in for full vector-clock dominance
/// tracking: a tombstone should ideally survive until every live
/// replica's clock dominates it, but the engine doesn't track
/// per-subscriber clocks, only presence in the subscription registry.
/// Requiring zero watchers before GC never removes data a connected
/// client might still depend on — it just GCs less eagerly than full
/// dominance tracking would (see DESIGN.md).
pub fn sweep_tombstones(
    shards: &ShardPool,
    tables: &[String],
    retention_ms: i64,
    now_ms: i64,
    is_watched: impl Fn(&str, &str) -> bool,
) -> VergeResult<usize> {
    const PAGE: usize = 256;
    let mut removed = 0;
    for table in tables {
        for shard_index in 0..shards.shard_count() {
            let shard = shards.shard(shard_index)?;
            let mut offset = 0;
            loop {
                let page = shard.scan(table, PAGE, offset)?;
                if page.is_empty() {
                    break;
                }
                let eligible: Vec<String> = page
                    .iter()
                    .filter(|row| row.deleted && now_ms - row.updated_at >= retention_ms && !is_watched(table, &row.id))
                    .map(|row| row.id.clone())
                    .collect();
                if !eligible.is_empty() {
                    shard.batch_delete(table, &eligible)?;
                    removed += eligible.len();
                }
                offset += page.len();
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::Value;
    use verge_storage::Row;

    #[test]
    fn sweep_removes_only_old_unwatched_tombstones() {
        let shards = ShardPool::new_in_memory(1);
        let shard = shards.shard(0).unwrap();
        let mut fresh = Row::new("fresh", Value::Null, 1, 0);
        fresh.deleted = true;
        fresh.updated_at = 900;
        let mut stale = Row::new("stale", Value::Null, 1, 0);
        stale.deleted = true;
        stale.updated_at = 0;
        let mut watched = Row::new("watched", Value::Null, 1, 0);
        watched.deleted = true;
        watched.updated_at = 0;
        shard
            .batch_upsert("docs", vec![("fresh".into(), fresh), ("stale".into(), stale), ("watched".into(), watched)])
            .unwrap();

        let removed = sweep_tombstones(&shards, &["docs".to_string()], 1000, 1000, |_, id| id == "watched").unwrap();
        assert_eq!(removed, 1);
        assert!(shard.get("docs", "stale").unwrap().is_none());
        assert!(shard.get("docs", "fresh").unwrap().is_some());
        assert!(shard.get("docs", "watched").unwrap().is_some());
    }
}
