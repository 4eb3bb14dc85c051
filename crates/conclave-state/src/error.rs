//! Error types for conclave-state

use thiserror::Error;

/// Errors produced by checkpoint stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No snapshot exists for the session.
    #[error("no checkpoint found for session {session_id}")]
    NotFound { session_id: String },

    /// The stored state does not hash to the recorded digest.
    #[error("checkpoint {sequence} for session {session_id} is corrupt: expected digest {expected}, got {actual}")]
    Corrupt {
        session_id: String,
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// Session identifiers become directory names, so they are restricted.
    #[error("invalid session id: {session_id:?}")]
    InvalidSessionId { session_id: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure (lock poisoning, remote store errors, ...).
    #[error("storage backend failure: {0}")]
    Backend(String),
}
