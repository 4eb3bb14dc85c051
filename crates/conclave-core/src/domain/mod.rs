//! Domain model for conclave sessions.
//!
//! - `Agent` / `AgentCatalog`: registered worker descriptors
//! - `Task`: unit of work with a guarded status lifecycle
//! - `AgentResult`: one worker's output for one task
//! - `SessionState`: the aggregate threaded through the graph, merged by patches

pub mod agent;
pub mod error;
pub mod result;
pub mod state;
pub mod task;

pub use agent::{Agent, AgentCatalog, AgentRole, AgentStatus, DEFAULT_AGENT_PRIORITY};
pub use error::{OrchestrationError, Result};
pub use result::{AgentResult, ResultMetadata, ResultOutput, NEUTRAL_CONFIDENCE};
pub use state::{ErrorRecord, Message, MessageRole, Phase, SessionPatch, SessionState};
pub use task::{Task, TaskPriority, TaskStatus};
