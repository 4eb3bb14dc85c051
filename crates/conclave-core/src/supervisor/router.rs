//! The `supervisor` node: picks what runs next.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::execution::identify_parallelizable_tasks;
use super::{AGENT_EXECUTION, PARALLEL_EXECUTION, REVIEW, SUPERVISOR};
use crate::domain::state::{Message, Phase, SessionPatch, SessionState};
use crate::domain::task::{Task, TaskStatus};
use crate::graph::{GraphError, NodeHandler};

/// Highest-priority task among `candidates`; ties keep insertion order.
pub fn select_next_task<'a>(candidates: &[&'a Task]) -> Option<&'a Task> {
    let mut best: Option<&'a Task> = None;
    for &task in candidates {
        if best.map_or(true, |b| task.priority.rank() < b.priority.rank()) {
            best = Some(task);
        }
    }
    best
}

/// Tasks to start this round: a parallel batch when at least two independent
/// tasks are eligible, otherwise the single next task.
pub fn plan_dispatch(state: &SessionState) -> Vec<Task> {
    let eligible = state.runnable_tasks();
    let batch = identify_parallelizable_tasks(&eligible, state.max_parallel_agents);
    if batch.len() >= 2 {
        return batch.into_iter().cloned().collect();
    }
    select_next_task(&eligible).cloned().into_iter().collect()
}

pub struct SupervisorNode;

#[async_trait]
impl NodeHandler<SessionState> for SupervisorNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let selected = plan_dispatch(state);
        if selected.is_empty() {
            debug!(session_id = %state.session_id, "no pending tasks");
            return Ok(SessionPatch::new()
                .phase(Phase::Review)
                .message(Message::from_node(SUPERVISOR, "No pending tasks")));
        }

        let now = Utc::now();
        let mut patch = SessionPatch::new().phase(Phase::Execution);
        let mut ids = Vec::with_capacity(selected.len());
        for mut task in selected {
            task.ensure_ready(&state.tasks)
                .and_then(|_| task.start(now))
                .map_err(|e| GraphError::node_failed(SUPERVISOR, e))?;
            ids.push(task.task_id.clone());
            patch.active_agents.insert(task.agent_id.clone());
            patch.tasks.push(task);
        }

        let mode = if ids.len() > 1 { "parallel" } else { "single" };
        Ok(patch.message(Message::from_node(
            SUPERVISOR,
            format!("Dispatching {} ({mode}): {}", ids.len(), ids.join(", ")),
        )))
    }
}

pub fn route_from_supervisor(state: &SessionState) -> String {
    match state.tasks_with_status(TaskStatus::InProgress).count() {
        0 => REVIEW,
        1 => AGENT_EXECUTION,
        _ => PARALLEL_EXECUTION,
    }
    .to_string()
}
