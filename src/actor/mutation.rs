//! The three operations an actor supports: fill, aggregate-count and reset.

use super::state::ActorState;
use crate::core::{CHUNK_ID_SPACE, Chunk, Result, chunk_key, generate_chunk};
use crate::protocol::{ClearResult, PutResult, QueryResult};
use crate::storage::{ChunkStore, MAX_BATCH_KEYS};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-call bounds for [`fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillLimits {
    /// New chunks staged per call; repeated calls converge to a full keyspace.
    pub max_inserts_per_call: usize,
    /// Keys per `put_batch`, at most [`MAX_BATCH_KEYS`].
    pub batch_size: usize,
}

impl FillLimits {
    pub const DEFAULT_MAX_INSERTS: usize = 1024;

    pub fn new(max_inserts_per_call: usize, batch_size: usize) -> Self {
        Self {
            max_inserts_per_call: max_inserts_per_call.max(1),
            batch_size: batch_size.clamp(1, MAX_BATCH_KEYS),
        }
    }
}

impl Default for FillLimits {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_INSERTS, MAX_BATCH_KEYS)
    }
}

/// Idempotent top-up of the keyspace.
///
/// Stages missing chunk ids in ascending order up to the per-call cap and
/// flushes them in bounded batches. Each accepted batch is mirrored before the
/// next one is written. Existing chunks are never rewritten.
pub async fn fill(
    state: &mut ActorState,
    store: &dyn ChunkStore,
    limits: FillLimits,
) -> Result<PutResult> {
    state.ensure_loaded(store).await?;

    let mut staged: Vec<(String, Chunk)> = Vec::new();
    for chunk_id in 0..CHUNK_ID_SPACE {
        let key = chunk_key(chunk_id);
        if state.contains_key(&key) {
            continue;
        }
        staged.push((key, generate_chunk()));
        if staged.len() == limits.max_inserts_per_call {
            break;
        }
    }

    let insert_count = staged.len() as u64;
    let mut staged = staged.into_iter().peekable();
    let mut batches = 0usize;
    while staged.peek().is_some() {
        let batch: BTreeMap<String, Chunk> = staged.by_ref().take(limits.batch_size).collect();
        store.put_batch(batch.clone()).await?;
        state.insert_flushed(batch);
        batches += 1;
    }

    if insert_count > 0 {
        info!(inserted = insert_count, batches, resident = state.len(), "filled chunks");
    } else {
        debug!(resident = state.len(), "fill found no gaps");
    }

    Ok(PutResult {
        insert_count,
        update_count: 0,
        attributes_update_count: 0,
        debug: None,
    })
}

/// Touches every resident item and reports how many there were.
///
/// Reads only the in-memory mirror.
pub fn aggregate_count(state: &ActorState) -> QueryResult {
    let mut line_strings = 0u64;
    for (_key, chunk) in state.chunks() {
        for (_id, _line_string) in chunk.iter() {
            line_strings += 1;
        }
    }
    QueryResult {
        counts: Vec::new(),
        ids: None,
        debug: Some(format!("lineStrings={}", line_strings)),
    }
}

/// Deletes the persisted namespace and the mirror.
///
/// Load counters are lifetime diagnostics and survive a reset.
pub async fn reset(state: &mut ActorState, store: &dyn ChunkStore) -> Result<ClearResult> {
    store.delete_all().await?;
    let dropped = state.len();
    state.clear_chunks();
    info!(dropped, "cleared actor keyspace");
    Ok(ClearResult {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CHUNK_PREFIX;
    use crate::storage::{FaultPlan, InMemoryChunkStore};

    #[test]
    fn limits_are_clamped() {
        let limits = FillLimits::new(0, 1000);
        assert_eq!(limits.max_inserts_per_call, 1);
        assert_eq!(limits.batch_size, MAX_BATCH_KEYS);
    }

    #[tokio::test]
    async fn fill_writes_in_bounded_batches() {
        let store = InMemoryChunkStore::new();
        let mut state = ActorState::new();
        let result = fill(&mut state, &store, FillLimits::new(300, 128))
            .await
            .unwrap();
        assert_eq!(result.insert_count, 300);
        // 128 + 128 + 44
        assert_eq!(store.put_calls(), 3);
        assert_eq!(state.len(), 300);
        assert!(state.contains_key(&chunk_key(299)));
        assert!(!state.contains_key(&chunk_key(300)));
    }

    #[tokio::test]
    async fn fill_failure_keeps_flushed_batches() {
        let store = InMemoryChunkStore::with_faults(FaultPlan::default().fail_put_on(3));
        let mut state = ActorState::new();
        assert!(fill(&mut state, &store, FillLimits::default()).await.is_err());
        assert_eq!(state.len(), 256);
        assert_eq!(store.len().await, 256);

        let retry = fill(&mut state, &store, FillLimits::default()).await.unwrap();
        assert_eq!(retry.insert_count, 1024);
        assert_eq!(state.len(), 1280);
    }

    #[tokio::test]
    async fn aggregate_count_touches_every_item() {
        let store = InMemoryChunkStore::new();
        let mut state = ActorState::new();
        fill(&mut state, &store, FillLimits::new(10, 128)).await.unwrap();
        let result = aggregate_count(&state);
        assert_eq!(result.debug.as_deref(), Some("lineStrings=310"));
        assert!(result.counts.is_empty());
        assert!(result.ids.is_none());
    }

    #[tokio::test]
    async fn reset_keeps_load_counters() {
        let store = InMemoryChunkStore::new();
        let mut state = ActorState::new();
        fill(&mut state, &store, FillLimits::new(10, 128)).await.unwrap();
        let mut reloaded = ActorState::new();
        reloaded.ensure_loaded(&store).await.unwrap();
        let before = reloaded.stats();
        assert_eq!(before.loaded_chunks, 10);

        reset(&mut reloaded, &store).await.unwrap();
        assert!(reloaded.is_empty());
        assert!(store.list(CHUNK_PREFIX, 10, None).await.unwrap().is_empty());
        assert_eq!(reloaded.stats(), before);
    }
}
