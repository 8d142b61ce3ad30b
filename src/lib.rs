// ============================================================================
// memrepro Library
// ============================================================================

pub mod actor;
pub mod config;
pub mod control_plane;
pub mod core;
pub mod fanout;
pub mod protocol;
pub mod storage;
pub mod web;

// Re-export main types for convenience
pub use actor::{ActorContext, ActorHost, ActorHostConfig, ActorSettings, ActorState, FillLimits};
pub use config::HarnessConfig;
pub use core::{ReproError, Result};
pub use fanout::{
    ActorDirectory, ActorPath, FanOut, FanOutReport, FanOutSummary, RemoteActorDirectory,
};
pub use protocol::{ActorEnvelope, ActorRequest, ActorResult, Operation, Side};
pub use storage::{
    ChunkStore, FileChunkStore, FileStoreProvider, InMemoryChunkStore, MemoryStoreProvider,
    StoreProvider,
};
pub use web::{AppState, build_router};
