use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stale clock: {0}")]
    StaleClock(String),

    #[error("Quorum error: {0}")]
    Quorum(String),

    #[error("Not enough read responses: {received} < {required}")]
    NotEnoughReadResponses { received: usize, required: usize },

    #[error("Not enough write responses: {received} < {required}")]
    NotEnoughWriteResponses { received: usize, required: usize },

    #[error("Ring is empty")]
    RingEmpty,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

// Error conversions for common error types

impl From<bincode::error::EncodeError> for KvError {
    fn from(e: bincode::error::EncodeError) -> Self {
        KvError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for KvError {
    fn from(e: bincode::error::DecodeError) -> Self {
        KvError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Serialization(e.to_string())
    }
}

impl From<sled::Error> for KvError {
    fn from(e: sled::Error) -> Self {
        KvError::Storage(e.to_string())
    }
}
