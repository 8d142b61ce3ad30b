pub mod context;
pub mod host;
pub mod identity;
pub mod mutation;
pub mod state;

pub use context::{ActorContext, ActorSettings};
pub use host::{ActorHost, ActorHostConfig, HANG_DURATION, HANG_REPLY};
pub use identity::diagnostic_id;
pub use mutation::{FillLimits, aggregate_count, fill, reset};
pub use state::{ActorState, DEFAULT_PAGE_SIZE, LoadStats, MIN_PAGE_SIZE};
