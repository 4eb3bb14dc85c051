//! Checkpoint record and store trait.
//!
//! A [`Checkpoint`] is an opaque JSON snapshot of a session plus enough
//! bookkeeping to resume it: the graph node to re-enter and a SHA-256 digest
//! of the serialised state. Stores are keyed by session id and follow
//! last-writer-wins semantics; a single orchestration process owns a session
//! at a time, so no locking across processes is attempted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// SHA-256 hex digest of a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest(String);

impl StateDigest {
    /// Digest the canonical serialisation of `state`.
    ///
    /// `serde_json::Value` keeps object keys sorted, so equal values always
    /// produce equal digests.
    pub fn of(state: &serde_json::Value) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(state)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(StateDigest(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for StateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted snapshot of one orchestration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    /// Monotonic per session; the store's `get` returns the highest one.
    pub sequence: u64,
    /// Graph node to re-enter on resume. `None` means the run terminated.
    pub next_node: Option<String>,
    /// Phase label at the time of the snapshot (diagnostic).
    pub phase: String,
    pub state: serde_json::Value,
    pub state_digest: StateDigest,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a checkpoint, digesting `state`.
    pub fn new(
        session_id: impl Into<String>,
        sequence: u64,
        next_node: Option<String>,
        phase: impl Into<String>,
        state: serde_json::Value,
    ) -> StorageResult<Self> {
        let state_digest = StateDigest::of(&state)?;
        Ok(Self {
            session_id: session_id.into(),
            sequence,
            next_node,
            phase: phase.into(),
            state,
            state_digest,
            created_at: Utc::now(),
        })
    }

    /// Recompute the state digest and compare it with the recorded one.
    pub fn verify(&self) -> StorageResult<()> {
        let actual = StateDigest::of(&self.state)?;
        if actual != self.state_digest {
            return Err(StorageError::Corrupt {
                session_id: self.session_id.clone(),
                sequence: self.sequence,
                expected: self.state_digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

/// Keyed snapshot store for orchestration sessions.
///
/// Guarantees:
/// - `get` returns the checkpoint with the highest `sequence` for the session,
///   or `None` when nothing was stored.
/// - `list` returns every retained checkpoint ordered by `sequence`.
/// - `put` with an existing `(session_id, sequence)` overwrites it.
/// - `latest_sequence` agrees with `get` whenever `get` succeeds.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for the session, if any.
    async fn get(&self, session_id: &str) -> StorageResult<Option<Checkpoint>>;

    /// Persist a checkpoint.
    async fn put(&self, session_id: &str, checkpoint: Checkpoint) -> StorageResult<()>;

    /// All checkpoints for the session, oldest first.
    async fn list(&self, session_id: &str) -> StorageResult<Vec<Checkpoint>>;

    /// Highest stored sequence for the session, without decoding snapshots.
    ///
    /// Stores that can enumerate sequences cheaply should override this so a
    /// single unreadable snapshot does not hide the history length.
    async fn latest_sequence(&self, session_id: &str) -> StorageResult<Option<u64>> {
        Ok(self.get(session_id).await?.map(|c| c.sequence))
    }

    /// Drop every checkpoint for the session. No-op if absent.
    async fn delete(&self, session_id: &str) -> StorageResult<()>;
}
