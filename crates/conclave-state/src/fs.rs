use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::checkpoint::{Checkpoint, CheckpointStore, StorageResult};
use crate::error::StorageError;

/// Filesystem-backed checkpoint store.
///
/// Layout: `<root>/sessions/<session_id>/<sequence, zero padded>.json`
///
/// Writes go through a temp file in the session directory followed by a
/// rename, so a crash never leaves a half-written snapshot behind.
pub struct FsCheckpointStore {
    sessions_dir: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store rooted at `root`. Creates `root/sessions/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let sessions_dir = root.as_ref().join("sessions");
        fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir })
    }

    fn session_dir(&self, session_id: &str) -> StorageResult<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id != "."
            && session_id != ".."
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidSessionId {
                session_id: session_id.to_string(),
            });
        }
        Ok(self.sessions_dir.join(session_id))
    }

    fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
        dir.join(format!("{sequence:020}.json"))
    }

    /// Sequence numbers present on disk, ascending.
    fn sequences(dir: &Path) -> StorageResult<Vec<u64>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sequences = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(seq) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                sequences.push(seq);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    fn read_snapshot(path: &Path) -> StorageResult<Checkpoint> {
        let bytes = fs::read(path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn get(&self, session_id: &str) -> StorageResult<Option<Checkpoint>> {
        let dir = self.session_dir(session_id)?;
        match Self::sequences(&dir)?.last() {
            Some(seq) => Ok(Some(Self::read_snapshot(&Self::snapshot_path(&dir, *seq))?)),
            None => Ok(None),
        }
    }

    async fn latest_sequence(&self, session_id: &str) -> StorageResult<Option<u64>> {
        let dir = self.session_dir(session_id)?;
        Ok(Self::sequences(&dir)?.last().copied())
    }

    async fn put(&self, session_id: &str, checkpoint: Checkpoint) -> StorageResult<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir)?;

        let path = Self::snapshot_path(&dir, checkpoint.sequence);
        let bytes = serde_json::to_vec_pretty(&checkpoint)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(
            session_id,
            sequence = checkpoint.sequence,
            digest = checkpoint.state_digest.short(),
            "checkpoint written"
        );
        Ok(())
    }

    async fn list(&self, session_id: &str) -> StorageResult<Vec<Checkpoint>> {
        let dir = self.session_dir(session_id)?;
        Self::sequences(&dir)?
            .into_iter()
            .map(|seq| Self::read_snapshot(&Self::snapshot_path(&dir, seq)))
            .collect()
    }

    async fn delete(&self, session_id: &str) -> StorageResult<()> {
        let dir = self.session_dir(session_id)?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
