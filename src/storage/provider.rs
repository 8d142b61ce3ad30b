use super::engine::ChunkStore;
use super::memory::InMemoryChunkStore;
use super::persistence::FileChunkStore;
use crate::core::{ReproError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Opens the persisted namespace that belongs to an actor name.
///
/// Namespaces outlive actor residency: evicting an actor and activating it
/// again must reach the same data.
pub trait StoreProvider: Send + Sync {
    fn open(&self, actor_name: &str) -> Result<Arc<dyn ChunkStore>>;
}

/// One in-memory store per actor name, kept for the lifetime of the provider.
#[derive(Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<String, Arc<InMemoryChunkStore>>>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a preconfigured store (e.g. with injected faults) for a name.
    pub fn insert(&self, actor_name: impl Into<String>, store: Arc<InMemoryChunkStore>) -> Result<()> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| ReproError::Storage(format!("store registry poisoned: {}", e)))?;
        stores.insert(actor_name.into(), store);
        Ok(())
    }

    pub fn store(&self, actor_name: &str) -> Result<Arc<InMemoryChunkStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| ReproError::Storage(format!("store registry poisoned: {}", e)))?;
        Ok(stores
            .entry(actor_name.to_string())
            .or_insert_with(|| Arc::new(InMemoryChunkStore::new()))
            .clone())
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn open(&self, actor_name: &str) -> Result<Arc<dyn ChunkStore>> {
        let store: Arc<dyn ChunkStore> = self.store(actor_name)?;
        Ok(store)
    }
}

/// One directory per actor name under `root`. Each directory is opened once
/// and shared by every incarnation of the actor.
pub struct FileStoreProvider {
    root: PathBuf,
    checkpoint_threshold: usize,
    /// Keyed by directory name, so one directory never has two writers.
    open_stores: Mutex<HashMap<String, Arc<FileChunkStore>>>,
}

impl FileStoreProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checkpoint_threshold: FileChunkStore::DEFAULT_CHECKPOINT_THRESHOLD,
            open_stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn dir_for(&self, actor_name: &str) -> PathBuf {
        self.root.join(sanitize_name(actor_name))
    }
}

impl StoreProvider for FileStoreProvider {
    fn open(&self, actor_name: &str) -> Result<Arc<dyn ChunkStore>> {
        let dir_name = sanitize_name(actor_name);
        let mut open_stores = self
            .open_stores
            .lock()
            .map_err(|e| ReproError::Storage(format!("store registry poisoned: {}", e)))?;
        if let Some(store) = open_stores.get(&dir_name) {
            let store: Arc<dyn ChunkStore> = store.clone();
            return Ok(store);
        }
        let store = Arc::new(FileChunkStore::open_with(
            self.root.join(&dir_name),
            self.checkpoint_threshold,
            false,
        )?);
        open_stores.insert(dir_name, store.clone());
        let store: Arc<dyn ChunkStore> = store;
        Ok(store)
    }
}

/// Maps an actor name onto a single safe path component, one-to-one.
///
/// ASCII letters, digits and `-` are kept; every other byte becomes `_xx`
/// (lowercase hex). The empty name maps to a lone `_`, which no other name
/// can produce.
fn sanitize_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}
