use crate::core::{Chunk, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Maximum number of keys a single `put_batch` call may carry.
pub const MAX_BATCH_KEYS: usize = 128;

/// One page returned by [`ChunkStore::list`], in ascending key order.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<(String, Chunk)>,
}

impl ListPage {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_key(&self) -> Option<&str> {
        self.entries.last().map(|(key, _)| key.as_str())
    }
}

/// Persisted, sorted key-value substrate backing one actor's keyspace.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// List keys under `prefix` in ascending order, at most `limit` entries.
    ///
    /// `start` is inclusive: when it names an existing key, that key is the
    /// first entry of the page.
    async fn list(&self, prefix: &str, limit: usize, start: Option<&str>) -> Result<ListPage>;

    /// Write every entry of `batch` atomically. Fails for more than
    /// [`MAX_BATCH_KEYS`] keys.
    async fn put_batch(&self, batch: BTreeMap<String, Chunk>) -> Result<()>;

    /// Remove every key in the namespace.
    async fn delete_all(&self) -> Result<()>;
}

/// Shared page selection over an ordered map, used by the concrete stores.
pub(crate) fn select_page(
    entries: &BTreeMap<String, Chunk>,
    prefix: &str,
    limit: usize,
    start: Option<&str>,
) -> ListPage {
    let lower = match start {
        Some(start) if start > prefix => start,
        _ => prefix,
    };
    let entries = entries
        .range::<str, _>((std::ops::Bound::Included(lower), std::ops::Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .take(limit)
        .map(|(key, chunk)| (key.clone(), chunk.clone()))
        .collect();
    ListPage { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{chunk_key, generate_chunk};

    fn sample() -> BTreeMap<String, Chunk> {
        let mut map = BTreeMap::new();
        for id in 0..10u16 {
            map.insert(chunk_key(id), generate_chunk());
        }
        map.insert("other-key".to_string(), Chunk::new());
        map.insert("v0-chunk-000".to_string(), Chunk::new());
        map
    }

    #[test]
    fn select_page_respects_prefix_and_limit() {
        let map = sample();
        let page = select_page(&map, "v1-chunk-", 4, None);
        let keys: Vec<&str> = page.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["v1-chunk-000", "v1-chunk-001", "v1-chunk-002", "v1-chunk-003"]
        );
    }

    #[test]
    fn select_page_start_is_inclusive() {
        let map = sample();
        let page = select_page(&map, "v1-chunk-", 3, Some("v1-chunk-008"));
        assert_eq!(page.len(), 2);
        assert_eq!(page.entries[0].0, "v1-chunk-008");
        assert_eq!(page.last_key(), Some("v1-chunk-009"));
    }

    #[test]
    fn select_page_start_before_prefix_is_clamped() {
        let map = sample();
        let page = select_page(&map, "v1-chunk-", 100, Some("a"));
        assert_eq!(page.len(), 10);
    }
}
