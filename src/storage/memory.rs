use super::engine::{ChunkStore, ListPage, MAX_BATCH_KEYS, select_page};
use crate::core::{Chunk, ReproError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Injected failures, keyed by the 1-based call number that should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_list_call: Option<u64>,
    pub fail_put_call: Option<u64>,
    pub fail_delete_call: Option<u64>,
}

impl FaultPlan {
    pub fn fail_list_on(mut self, call: u64) -> Self {
        self.fail_list_call = Some(call);
        self
    }

    pub fn fail_put_on(mut self, call: u64) -> Self {
        self.fail_put_call = Some(call);
        self
    }

    pub fn fail_delete_on(mut self, call: u64) -> Self {
        self.fail_delete_call = Some(call);
        self
    }
}

/// Process-local chunk store. Survives actor eviction as long as the owning
/// provider keeps it alive.
pub struct InMemoryChunkStore {
    entries: RwLock<BTreeMap<String, Chunk>>,
    faults: FaultPlan,
    list_calls: AtomicU64,
    put_calls: AtomicU64,
    delete_calls: AtomicU64,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            faults,
            list_calls: AtomicU64::new(0),
            put_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
        }
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    fn check_fault(counter: &AtomicU64, fail_on: Option<u64>, op: &str) -> Result<()> {
        let call = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if fail_on == Some(call) {
            return Err(ReproError::Storage(format!(
                "injected {} failure on call {}",
                op, call
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn list(&self, prefix: &str, limit: usize, start: Option<&str>) -> Result<ListPage> {
        Self::check_fault(&self.list_calls, self.faults.fail_list_call, "list")?;
        let entries = self.entries.read().await;
        Ok(select_page(&entries, prefix, limit, start))
    }

    async fn put_batch(&self, batch: BTreeMap<String, Chunk>) -> Result<()> {
        Self::check_fault(&self.put_calls, self.faults.fail_put_call, "put")?;
        if batch.len() > MAX_BATCH_KEYS {
            return Err(ReproError::BatchTooLarge(batch.len(), MAX_BATCH_KEYS));
        }
        let mut entries = self.entries.write().await;
        entries.extend(batch);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        Self::check_fault(&self.delete_calls, self.faults.fail_delete_call, "delete")?;
        self.entries.write().await.clear();
        Ok(())
    }
}
