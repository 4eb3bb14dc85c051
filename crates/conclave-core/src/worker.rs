//! The worker execution capability.
//!
//! The orchestrator never runs agents itself. It hands an in-progress task to a
//! [`WorkerExecutor`] supplied by the caller; production code wires this to a
//! reasoning engine, tests inject [`crate::fakes::ScriptedWorker`].

use async_trait::async_trait;

use crate::domain::result::AgentResult;
use crate::domain::state::Message;
use crate::domain::task::Task;

/// Failure reported by a worker.
///
/// The rendered message is what the error handler classifies, so the
/// recoverable variants keep their marker (`rate_limit`, `temporary_failure`)
/// at the front.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("rate_limit: {0}")]
    RateLimited(String),

    #[error("temporary_failure: {0}")]
    Temporary(String),

    #[error("agent {0} is not available")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Executes one task on behalf of one agent.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    /// Only ever called with a task that is in progress.
    async fn execute_task(
        &self,
        agent_id: &str,
        task: &Task,
        history: &[Message],
        session_id: &str,
    ) -> Result<AgentResult, WorkerError>;
}
