//! Domain-level error taxonomy for conclave.
//!
//! Task-level failures (a worker erroring or timing out) are never raised as
//! errors; they are recorded on the result and in the session error log.
//! Everything here is either a configuration problem detected before the
//! graph runs, an illegal state change, or a persistence failure surfaced to
//! a caller that asked for stored data.

use conclave_state::StorageError;

use crate::domain::task::TaskStatus;
use crate::graph::GraphError;

/// Conclave domain errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown agent role: {0}")]
    UnknownAgentRole(String),

    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} has unmet dependencies: {}", unmet.join(", "))]
    UnmetDependencies { task_id: String, unmet: Vec<String> },

    #[error("no checkpoint found for session {session_id}")]
    CheckpointNotFound { session_id: String },

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl OrchestrationError {
    /// Configuration-class errors abort before any node runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::UnknownAgentRole(_)
                | Self::DuplicateAgent(_)
                | Self::ConfigParse(_)
        )
    }
}

/// Result type for conclave domain operations.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
