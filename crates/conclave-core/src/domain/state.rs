//! Session state and the reducer-style patch merge.
//!
//! Node handlers never mutate [`SessionState`] directly. They return a
//! [`SessionPatch`] and the graph engine folds it in with [`SessionState::apply`],
//! which applies one reducer per field:
//!
//! | Field | Reducer |
//! |-------|---------|
//! | `messages`, `errors` | append |
//! | `active_agents` | set union |
//! | `tasks` | replace by `task_id`, append new |
//! | `results` | append, replacing an earlier result with the same `(agent_id, task_id)` |
//! | `consensus_results`, `metadata` | replace by key |
//! | `retry_count` | max of old and new, capped at `max_retries` |
//! | everything else | replace when present |

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::Agent;
use super::result::AgentResult;
use super::task::{Task, TaskStatus};
use crate::config::OrchestrationConfig;
use crate::graph::GraphState;

/// Key under which the consensus builder stores the agreement score.
pub const AGREEMENT_KEY: &str = "agreement";

/// Stage of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Execution,
    Consensus,
    Review,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Planning => "planning",
            Phase::Execution => "execution",
            Phase::Consensus => "consensus",
            Phase::Review => "review",
            Phase::Complete => "complete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Entry of the append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    /// Speaker, e.g. an agent id or a node name.
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            name: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_node(node: &str, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            name: Some(node.to_string()),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Task-level failure or review rejection recorded for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: None,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Aggregate state threaded through every graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub objective: String,
    pub messages: Vec<Message>,
    pub available_agents: Vec<Agent>,
    pub active_agents: BTreeSet<String>,
    pub tasks: Vec<Task>,
    pub results: Vec<AgentResult>,
    pub current_phase: Phase,
    pub consensus_required: bool,
    pub consensus_threshold: f64,
    pub consensus_results: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<ErrorRecord>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Current fan-out cap; the coordination protocol may lower it.
    pub max_parallel_agents: usize,
    /// Configured fan-out cap; never changed by nodes.
    pub parallelism_ceiling: usize,
    pub agent_timeout_ms: u64,
    pub checkpoint_count: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SessionState {
    /// Fresh session for `objective`, seeded with the objective as the first message.
    pub fn initial(config: &OrchestrationConfig, objective: &str, agents: Vec<Agent>) -> Self {
        let mut metadata = BTreeMap::new();
        if let Some(user_id) = &config.user_id {
            metadata.insert(
                "user_id".to_string(),
                serde_json::Value::String(user_id.clone()),
            );
        }
        metadata.insert(
            "started_at".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );

        Self {
            session_id: config.session_id.clone(),
            objective: objective.to_string(),
            messages: vec![Message::user(objective)],
            available_agents: agents,
            active_agents: BTreeSet::new(),
            tasks: Vec::new(),
            results: Vec::new(),
            current_phase: Phase::Planning,
            consensus_required: config.consensus_required,
            consensus_threshold: config.consensus_threshold,
            consensus_results: BTreeMap::new(),
            errors: Vec::new(),
            retry_count: 0,
            max_retries: config.max_retries,
            max_parallel_agents: config.max_parallel_agents,
            parallelism_ceiling: config.max_parallel_agents,
            agent_timeout_ms: config.agent_timeout_ms,
            checkpoint_count: 0,
            metadata,
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.available_agents.iter().find(|a| a.id == agent_id)
    }

    pub fn agent_priority(&self, agent_id: &str) -> Option<u8> {
        self.agent(agent_id).map(|a| a.priority)
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.status == status)
    }

    /// Pending tasks whose dependencies have all completed.
    pub fn runnable_tasks(&self) -> Vec<&Task> {
        self.tasks_with_status(TaskStatus::Pending)
            .filter(|t| t.dependencies_met(&self.tasks))
            .collect()
    }

    /// Latest agreement score written by the consensus builder.
    pub fn agreement_score(&self) -> Option<f64> {
        self.consensus_results
            .get(AGREEMENT_KEY)
            .and_then(serde_json::Value::as_f64)
    }
}

/// Partial update returned by a node handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub messages: Vec<Message>,
    pub active_agents: BTreeSet<String>,
    pub tasks: Vec<Task>,
    pub results: Vec<AgentResult>,
    pub current_phase: Option<Phase>,
    pub consensus_required: Option<bool>,
    pub consensus_threshold: Option<f64>,
    pub consensus_results: BTreeMap<String, serde_json::Value>,
    pub errors: Vec<ErrorRecord>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub max_parallel_agents: Option<usize>,
    pub agent_timeout_ms: Option<u64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.current_phase = Some(phase);
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn error(mut self, error: ErrorRecord) -> Self {
        self.errors.push(error);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn result(mut self, result: AgentResult) -> Self {
        self.results.push(result);
        self
    }

    pub fn consensus_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.consensus_results.insert(key.into(), value);
        self
    }

    /// Names of the fields this patch touches, for logs and events.
    pub fn keys_changed(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        let mut mark = |present: bool, key: &'static str| {
            if present {
                keys.push(key);
            }
        };
        mark(!self.messages.is_empty(), "messages");
        mark(!self.active_agents.is_empty(), "active_agents");
        mark(!self.tasks.is_empty(), "tasks");
        mark(!self.results.is_empty(), "results");
        mark(self.current_phase.is_some(), "current_phase");
        mark(self.consensus_required.is_some(), "consensus_required");
        mark(self.consensus_threshold.is_some(), "consensus_threshold");
        mark(!self.consensus_results.is_empty(), "consensus_results");
        mark(!self.errors.is_empty(), "errors");
        mark(self.retry_count.is_some(), "retry_count");
        mark(self.max_retries.is_some(), "max_retries");
        mark(self.max_parallel_agents.is_some(), "max_parallel_agents");
        mark(self.agent_timeout_ms.is_some(), "agent_timeout_ms");
        mark(!self.metadata.is_empty(), "metadata");
        keys
    }
}

fn replace_tasks_by_id(tasks: &mut Vec<Task>, incoming: Vec<Task>) {
    for task in incoming {
        match tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
    }
}

fn upsert_results(results: &mut Vec<AgentResult>, incoming: Vec<AgentResult>) {
    for result in incoming {
        match results.iter_mut().find(|r| r.key() == result.key()) {
            Some(existing) => *existing = result,
            None => results.push(result),
        }
    }
}

impl GraphState for SessionState {
    type Patch = SessionPatch;

    fn apply(&mut self, patch: SessionPatch) {
        self.messages.extend(patch.messages);
        self.active_agents.extend(patch.active_agents);
        replace_tasks_by_id(&mut self.tasks, patch.tasks);
        upsert_results(&mut self.results, patch.results);
        self.consensus_results.extend(patch.consensus_results);
        self.errors.extend(patch.errors);
        self.metadata.extend(patch.metadata);

        if let Some(phase) = patch.current_phase {
            self.current_phase = phase;
        }
        if let Some(required) = patch.consensus_required {
            self.consensus_required = required;
        }
        if let Some(threshold) = patch.consensus_threshold {
            self.consensus_threshold = threshold;
        }
        if let Some(max_retries) = patch.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(parallel) = patch.max_parallel_agents {
            self.max_parallel_agents = parallel.clamp(1, self.parallelism_ceiling.max(1));
        }
        if let Some(timeout) = patch.agent_timeout_ms {
            self.agent_timeout_ms = timeout;
        }
        if let Some(retry) = patch.retry_count {
            self.retry_count = self.retry_count.max(retry);
        }
        self.retry_count = self.retry_count.min(self.max_retries);
    }

    fn mark_checkpoint(&mut self) -> u64 {
        self.checkpoint_count += 1;
        self.checkpoint_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskPriority;
    use serde_json::json;

    fn state() -> SessionState {
        SessionState::initial(
            &OrchestrationConfig::new("s-1"),
            "Research and analyze market trends",
            Vec::new(),
        )
    }

    #[test]
    fn test_initial_state_seeds_objective_message() {
        let s = state();
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.messages[0].role, MessageRole::User);
        assert_eq!(s.current_phase, Phase::Planning);
        assert_eq!(s.checkpoint_count, 0);
    }

    #[test]
    fn test_tasks_replace_by_id_and_keep_order() {
        let mut s = state();
        s.apply(
            SessionPatch::new()
                .task(Task::new("t1", "a", "one", TaskPriority::High))
                .task(Task::new("t2", "b", "two", TaskPriority::Low)),
        );
        let mut updated = s.tasks[0].clone();
        updated.description = "one, revised".to_string();
        s.apply(SessionPatch::new().task(updated));

        assert_eq!(s.tasks.len(), 2);
        assert_eq!(s.tasks[0].task_id, "t1");
        assert_eq!(s.tasks[0].description, "one, revised");
    }

    #[test]
    fn test_results_keep_one_per_agent_and_task() {
        let mut s = state();
        s.apply(SessionPatch::new().result(AgentResult::failure("a", "t1", "timeout")));
        s.apply(
            SessionPatch::new()
                .result(AgentResult::new("a", "t1", "done"))
                .result(AgentResult::new("b", "t1", "other")),
        );
        assert_eq!(s.results.len(), 2);
        assert!(!s.results[0].is_error());
    }

    #[test]
    fn test_active_agents_union_and_errors_append() {
        let mut s = state();
        let mut patch = SessionPatch::new().error(ErrorRecord::new("a", "boom"));
        patch.active_agents.insert("a".to_string());
        s.apply(patch);
        let mut patch = SessionPatch::new().error(ErrorRecord::new("b", "bang"));
        patch.active_agents.insert("b".to_string());
        patch.active_agents.insert("a".to_string());
        s.apply(patch);

        assert_eq!(s.active_agents.len(), 2);
        assert_eq!(s.errors.len(), 2);
    }

    #[test]
    fn test_retry_count_is_monotonic_and_bounded() {
        let mut s = state();
        s.max_retries = 2;
        s.apply(SessionPatch {
            retry_count: Some(2),
            ..Default::default()
        });
        s.apply(SessionPatch {
            retry_count: Some(1),
            ..Default::default()
        });
        assert_eq!(s.retry_count, 2);
        s.apply(SessionPatch {
            retry_count: Some(9),
            ..Default::default()
        });
        assert_eq!(s.retry_count, 2);
    }

    #[test]
    fn test_parallelism_never_exceeds_ceiling() {
        let mut s = state();
        s.apply(SessionPatch {
            max_parallel_agents: Some(100),
            ..Default::default()
        });
        assert_eq!(s.max_parallel_agents, s.parallelism_ceiling);
        s.apply(SessionPatch {
            max_parallel_agents: Some(0),
            ..Default::default()
        });
        assert_eq!(s.max_parallel_agents, 1);
    }

    #[test]
    fn test_consensus_results_replace_by_key() {
        let mut s = state();
        s.apply(SessionPatch::new().consensus_entry(AGREEMENT_KEY, json!(40.0)));
        s.apply(SessionPatch::new().consensus_entry(AGREEMENT_KEY, json!(90.0)));
        assert_eq!(s.agreement_score(), Some(90.0));
    }

    #[test]
    fn test_mark_checkpoint_increments() {
        let mut s = state();
        assert_eq!(s.mark_checkpoint(), 1);
        assert_eq!(s.mark_checkpoint(), 2);
    }

    #[test]
    fn test_keys_changed_lists_touched_fields() {
        let patch = SessionPatch::new()
            .phase(Phase::Review)
            .message(Message::from_node("review", "ok"));
        assert_eq!(patch.keys_changed(), vec!["messages", "current_phase"]);
    }
}
