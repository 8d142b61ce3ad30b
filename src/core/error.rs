use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReproError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Batch of {0} keys exceeds the limit of {1} keys per put")]
    BatchTooLarge(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Actor '{0}' is unavailable")]
    ActorUnavailable(String),

    #[error("Fan-out width must be between 1 and {1}, got {0}")]
    InvalidFanOutWidth(usize, usize),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, ReproError>;

impl From<std::io::Error> for ReproError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ReproError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
