//! In-memory checkpoint store (tests and single-process use)
//!
//! Provides `MemoryCheckpointStore`, which satisfies the `CheckpointStore`
//! contract without touching the filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointStore, StorageResult};
use crate::error::StorageError;

type Sessions = HashMap<String, BTreeMap<u64, Checkpoint>>;

/// In-memory store backed by a `HashMap<session_id, BTreeMap<sequence, Checkpoint>>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    sessions: Mutex<Sessions>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Sessions>> {
        self.sessions
            .lock()
            .map_err(|e| StorageError::Backend(format!("checkpoint map poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, session_id: &str) -> StorageResult<Option<Checkpoint>> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .and_then(|history| history.values().next_back().cloned()))
    }

    async fn latest_sequence(&self, session_id: &str) -> StorageResult<Option<u64>> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .and_then(|history| history.keys().next_back().copied()))
    }

    async fn put(&self, session_id: &str, checkpoint: Checkpoint) -> StorageResult<()> {
        let mut sessions = self.lock()?;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(checkpoint.sequence, checkpoint);
        Ok(())
    }

    async fn list(&self, session_id: &str) -> StorageResult<Vec<Checkpoint>> {
        let sessions = self.lock()?;
        Ok(sessions
            .get(session_id)
            .map(|history| history.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, session_id: &str) -> StorageResult<()> {
        let mut sessions = self.lock()?;
        sessions.remove(session_id);
        Ok(())
    }
}

/// A store whose every operation fails. Exercises degraded-persistence paths.
#[derive(Debug, Default)]
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn get(&self, _session_id: &str) -> StorageResult<Option<Checkpoint>> {
        Err(StorageError::Backend("store unavailable".to_string()))
    }

    async fn put(&self, _session_id: &str, _checkpoint: Checkpoint) -> StorageResult<()> {
        Err(StorageError::Backend("store unavailable".to_string()))
    }

    async fn list(&self, _session_id: &str) -> StorageResult<Vec<Checkpoint>> {
        Err(StorageError::Backend("store unavailable".to_string()))
    }

    async fn delete(&self, _session_id: &str) -> StorageResult<()> {
        Err(StorageError::Backend("store unavailable".to_string()))
    }
}

/// In-memory store whose next read can be made to fail once.
///
/// `get` and `latest_sequence` share the armed failure; writes, `list` and
/// `delete` always go through.
#[derive(Debug, Default)]
pub struct FlakyCheckpointStore {
    inner: MemoryCheckpointStore,
    fail_next_read: AtomicBool,
}

impl FlakyCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a single read failure.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    fn tripped(&self) -> StorageResult<()> {
        if self.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("transient read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn get(&self, session_id: &str) -> StorageResult<Option<Checkpoint>> {
        self.tripped()?;
        self.inner.get(session_id).await
    }

    async fn latest_sequence(&self, session_id: &str) -> StorageResult<Option<u64>> {
        self.tripped()?;
        self.inner.latest_sequence(session_id).await
    }

    async fn put(&self, session_id: &str, checkpoint: Checkpoint) -> StorageResult<()> {
        self.inner.put(session_id, checkpoint).await
    }

    async fn list(&self, session_id: &str) -> StorageResult<Vec<Checkpoint>> {
        self.inner.list(session_id).await
    }

    async fn delete(&self, session_id: &str) -> StorageResult<()> {
        self.inner.delete(session_id).await
    }
}
