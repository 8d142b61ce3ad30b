pub mod engine;
pub mod memory;
pub mod persistence;
pub mod provider;

pub use engine::{ChunkStore, ListPage, MAX_BATCH_KEYS};
pub use memory::{FaultPlan, InMemoryChunkStore};
pub use persistence::FileChunkStore;
pub use provider::{FileStoreProvider, MemoryStoreProvider, StoreProvider};
