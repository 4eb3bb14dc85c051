//! Conclave-State: checkpoint persistence for orchestration sessions
//!
//! Sessions are persisted as JSON snapshots after graph transitions so a long
//! running orchestration can be resumed where it stopped.
//!
//! ## Key Components
//!
//! - `CheckpointStore`: keyed snapshot store (`get` / `put` / `list` / `delete`,
//!   plus `latest_sequence`)
//! - `Checkpoint`: snapshot record with a SHA-256 state digest
//! - `FsCheckpointStore`: one directory per session, atomic file writes
//! - `fakes::MemoryCheckpointStore`: in-memory store for tests

pub mod checkpoint;
mod error;
pub mod fakes;
mod fs;

pub use checkpoint::{Checkpoint, CheckpointStore, StateDigest, StorageResult};
pub use error::StorageError;
pub use fs::FsCheckpointStore;
