use crate::core::{CHUNK_PREFIX, Chunk, Result, serialized_size};
use crate::storage::ChunkStore;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Page size used when listing the chunk keyspace.
///
/// Larger pages risk exceeding the store's per-call response limit.
pub const DEFAULT_PAGE_SIZE: usize = 512;

/// The inclusive cursor occupies one slot of every page after the first, so a
/// page must hold at least one more entry to make progress.
pub const MIN_PAGE_SIZE: usize = 2;

/// Load counters. Cumulative for the lifetime of the actor state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub loaded: bool,
    pub loaded_chunks: u64,
    pub loaded_records: u64,
    pub loaded_size: u64,
    pub loaded_list_calls: u64,
}

/// In-memory mirror of one actor's chunk keyspace.
///
/// Built lazily by [`ActorState::ensure_loaded`]; discarded with the actor.
#[derive(Debug)]
pub struct ActorState {
    page_size: usize,
    stats: LoadStats,
    chunks: HashMap<String, Chunk>,
}

impl ActorState {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(MIN_PAGE_SIZE),
            stats: LoadStats::default(),
            chunks: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_loaded(&self) -> bool {
        self.stats.loaded
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Mirror every persisted chunk into memory. No-op once loaded.
    ///
    /// Pages use the previous page's last key as an inclusive start cursor;
    /// that key is skipped when it comes back. A failure leaves the state
    /// unloaded, and the next call rescans from the beginning.
    pub async fn ensure_loaded(&mut self, store: &dyn ChunkStore) -> Result<()> {
        if self.stats.loaded {
            return Ok(());
        }

        let mut start: Option<String> = None;
        loop {
            let page = store
                .list(CHUNK_PREFIX, self.page_size, start.as_deref())
                .await?;
            self.stats.loaded_list_calls += 1;

            let page_len = page.len();
            let next_start = page.last_key().map(str::to_string);
            for (key, chunk) in page.entries {
                if start.as_deref() == Some(key.as_str()) {
                    continue;
                }
                self.mirror(key, chunk);
            }

            if page_len < self.page_size {
                break;
            }
            start = next_start;
        }

        self.stats.loaded = true;
        debug!(
            chunks = self.stats.loaded_chunks,
            records = self.stats.loaded_records,
            bytes = self.stats.loaded_size,
            list_calls = self.stats.loaded_list_calls,
            "actor state loaded"
        );
        Ok(())
    }

    fn mirror(&mut self, key: String, chunk: Chunk) {
        if let Entry::Vacant(slot) = self.chunks.entry(key) {
            self.stats.loaded_chunks += 1;
            self.stats.loaded_records += chunk.len() as u64;
            self.stats.loaded_size += serialized_size(&chunk) as u64;
            slot.insert(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.chunks.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Chunk> {
        self.chunks.get(key)
    }

    pub fn chunks(&self) -> impl Iterator<Item = (&String, &Chunk)> {
        self.chunks.iter()
    }

    /// Record a batch the store has accepted. Load counters are untouched.
    pub(crate) fn insert_flushed(&mut self, batch: BTreeMap<String, Chunk>) {
        self.chunks.extend(batch);
    }

    /// Drop the mirror. `loaded` and the counters stay as they are.
    pub(crate) fn clear_chunks(&mut self) {
        self.chunks.clear();
    }
}

impl Default for ActorState {
    fn default() -> Self {
        Self::new()
    }
}
