//! The `error_handler` node: classify the latest failure, retry within budget.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::execution::in_flight_results;
use super::synchronizer::synchronize_parallel_results;
use super::{NodeContext, ERROR_HANDLER, SUPERVISOR};
use crate::domain::result::AgentResult;
use crate::domain::state::{Message, Phase, SessionPatch, SessionState};
use crate::domain::task::{Task, TaskStatus};
use crate::events::{publish_best_effort, ERROR_HANDLED};
use crate::graph::{GraphError, NodeHandler, END};
use crate::metrics::METRICS;

/// Error substrings worth another attempt.
pub const RECOVERABLE_MARKERS: [&str; 3] = ["timeout", "rate_limit", "temporary_failure"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Recoverable,
    NonRecoverable,
}

pub fn classify_error(error: &str) -> ErrorClass {
    if RECOVERABLE_MARKERS.iter().any(|m| error.contains(m)) {
        ErrorClass::Recoverable
    } else {
        ErrorClass::NonRecoverable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    Retry,
    Abort,
}

/// Fresh attempts for failed tasks whose error is recoverable.
///
/// One attempt per root task, and only when no attempt of it is still live
/// (pending, in progress, or completed).
pub fn requeue_failed_tasks(tasks: &[Task], results: &[AgentResult]) -> Vec<Task> {
    let live_roots: BTreeSet<&str> = tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Failed)
        .map(Task::root_id)
        .collect();

    let mut seen = BTreeSet::new();
    let mut requeued = Vec::new();
    for task in tasks.iter().rev().filter(|t| t.status == TaskStatus::Failed) {
        let root = task.root_id();
        if live_roots.contains(root) || !seen.insert(root) {
            continue;
        }
        let recoverable = results
            .iter()
            .rev()
            .find(|r| r.task_id == task.task_id)
            .and_then(|r| r.error.as_deref())
            .is_some_and(|e| classify_error(e) == ErrorClass::Recoverable);
        if !recoverable {
            continue;
        }
        let attempt = tasks.iter().filter(|t| t.root_id() == root).count() as u32;
        requeued.push(task.requeue(attempt));
    }
    requeued.reverse();
    requeued
}

pub struct ErrorHandlerNode {
    ctx: Arc<NodeContext>,
}

impl ErrorHandlerNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for ErrorHandlerNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let sync = synchronize_parallel_results(
            &state.tasks,
            &in_flight_results(state),
            self.ctx.classifier.as_ref(),
            Utc::now(),
        )
        .map_err(|e| GraphError::node_failed(ERROR_HANDLER, e))?;

        let mut tasks = state.tasks.clone();
        for task in &sync.tasks {
            if let Some(slot) = tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                *slot = task.clone();
            }
        }

        let last_error = state
            .errors
            .last()
            .map(|e| e.error.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        let class = classify_error(&last_error);

        let mut patch = SessionPatch::new();
        let decision = if class == ErrorClass::Recoverable && state.retry_count < state.max_retries
        {
            let attempt = state.retry_count + 1;
            let requeued = requeue_failed_tasks(&tasks, &state.results);
            info!(
                session_id = %state.session_id,
                attempt,
                max_retries = state.max_retries,
                requeued = requeued.len(),
                "retrying after recoverable error"
            );
            METRICS.inc_retries();
            patch.retry_count = Some(attempt);
            patch = patch.phase(Phase::Execution).message(Message::from_node(
                ERROR_HANDLER,
                format!(
                    "Error handled: {last_error} (attempt {attempt}/{})",
                    state.max_retries
                ),
            ));
            patch.tasks = sync.tasks;
            patch.tasks.extend(requeued);
            RecoveryDecision::Retry
        } else {
            let content = if class == ErrorClass::Recoverable {
                format!("Max retries reached: {last_error}")
            } else {
                format!("Non-recoverable error: {last_error}")
            };
            warn!(session_id = %state.session_id, error = %last_error, ?class, "aborting session");
            patch = patch.message(Message::from_node(ERROR_HANDLER, content));
            patch.tasks = sync.tasks;
            RecoveryDecision::Abort
        };

        publish_best_effort(
            self.ctx.publisher.as_ref(),
            &state.session_id,
            ERROR_HANDLED,
            json!({ "error": last_error, "class": class, "decision": decision }),
        )
        .await;

        patch.metadata.insert(
            "recovery".to_string(),
            json!({ "decision": decision, "class": class, "error": last_error }),
        );
        Ok(patch)
    }
}

pub fn route_after_error(state: &SessionState) -> String {
    let retry = state
        .metadata
        .get("recovery")
        .and_then(|r| r.get("decision"))
        .and_then(serde_json::Value::as_str)
        == Some("retry");
    if retry {
        SUPERVISOR.to_string()
    } else {
        END.to_string()
    }
}
