use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecallError {
    #[error("Backend '{backend}' unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    #[error("Failed to write chunks for {path}: {reason}")]
    ChunkWriteFailure { path: String, reason: String },

    #[error("Index state corrupt: {0}")]
    IndexStateCorrupt(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No source documents found")]
    NoSourceDocuments,

    #[error("Another reindex holds the lock at {0}")]
    IndexLocked(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecallError>;
