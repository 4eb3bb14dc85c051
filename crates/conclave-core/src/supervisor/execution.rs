//! Task dispatch: the `parallel_execution` and `agent_execution` nodes.
//!
//! Every in-progress task is handed to the worker on its own tokio task,
//! bounded by a semaphore sized to `max_parallel_agents` and raced against
//! `agent_timeout_ms`. A worker error or timeout becomes that task's result;
//! siblings are never cancelled. The node returns only after every call has
//! settled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use super::{NodeContext, AGENT_EXECUTION, ERROR_HANDLER, PARALLEL_EXECUTION, SYNCHRONIZE};
use crate::domain::result::AgentResult;
use crate::domain::state::{ErrorRecord, Message, SessionPatch, SessionState};
use crate::domain::task::{Task, TaskStatus};
use crate::events::{publish_best_effort, TASK_DISPATCHED, TASK_FINISHED};
use crate::graph::{GraphError, NodeHandler};
use crate::metrics::METRICS;

/// Independent tasks, high priority first (stable), at most `max_parallel`.
pub fn identify_parallelizable_tasks<'a>(pending: &[&'a Task], max_parallel: usize) -> Vec<&'a Task> {
    let mut independent: Vec<&'a Task> = pending
        .iter()
        .copied()
        .filter(|t| t.dependencies.is_empty())
        .collect();
    independent.sort_by_key(|t| t.priority.rank());
    independent.truncate(max_parallel);
    independent
}

/// Results belonging to the tasks currently in progress.
pub fn in_flight_results(state: &SessionState) -> Vec<&AgentResult> {
    state
        .tasks_with_status(TaskStatus::InProgress)
        .filter_map(|task| {
            state
                .results
                .iter()
                .rev()
                .find(|r| r.task_id == task.task_id)
        })
        .collect()
}

/// Run `tasks` against the worker and wait for all of them.
///
/// Results come back in task order. `parallel` tags each result's metadata.
#[instrument(skip_all, fields(session_id = %state.session_id, tasks = tasks.len()))]
pub async fn dispatch_tasks(
    ctx: &NodeContext,
    state: &SessionState,
    tasks: Vec<Task>,
    parallel: bool,
) -> Vec<AgentResult> {
    let sem = Arc::new(Semaphore::new(state.max_parallel_agents.max(1)));
    let history = Arc::new(state.messages.clone());
    let timeout = Duration::from_millis(state.agent_timeout_ms);

    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        publish_best_effort(
            ctx.publisher.as_ref(),
            &state.session_id,
            TASK_DISPATCHED,
            json!({ "taskId": task.task_id, "agentId": task.agent_id, "parallel": parallel }),
        )
        .await;
        METRICS.inc_tasks_dispatched();

        let worker = Arc::clone(&ctx.worker);
        let sem = Arc::clone(&sem);
        let history = Arc::clone(&history);
        let session_id = state.session_id.clone();
        let agent_id = task.agent_id.clone();
        let task_id = task.task_id.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let started_at = Utc::now();
            let clock = Instant::now();

            let outcome = tokio::time::timeout(
                timeout,
                worker.execute_task(&task.agent_id, &task, &history, &session_id),
            )
            .await;

            let mut result = match outcome {
                Ok(Ok(mut result)) => {
                    result.agent_id = task.agent_id.clone();
                    result.task_id = task.task_id.clone();
                    result.normalize_confidence();
                    result
                }
                Ok(Err(e)) => {
                    warn!(agent_id = %task.agent_id, task_id = %task.task_id, error = %e, "task failed");
                    METRICS.inc_task_failures();
                    AgentResult::failure(&task.agent_id, &task.task_id, e.to_string())
                }
                Err(_) => {
                    warn!(
                        agent_id = %task.agent_id,
                        task_id = %task.task_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "task timed out"
                    );
                    METRICS.inc_task_timeouts();
                    let mut failed = AgentResult::failure(
                        &task.agent_id,
                        &task.task_id,
                        format!("timeout: no result within {}ms", timeout.as_millis()),
                    );
                    failed.metadata.timed_out = true;
                    failed
                }
            };
            result.metadata.started_at = Some(started_at);
            result.metadata.completed_at = Some(Utc::now());
            result.metadata.execution_time_ms = clock.elapsed().as_millis() as u64;
            result.metadata.parallel_execution = parallel;
            result
        });
        handles.push((agent_id, task_id, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (agent_id, task_id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(agent_id = %agent_id, task_id = %task_id, error = %e, "worker task aborted");
                METRICS.inc_task_failures();
                AgentResult::failure(agent_id, task_id, format!("worker aborted: {e}"))
            }
        };
        publish_best_effort(
            ctx.publisher.as_ref(),
            &state.session_id,
            TASK_FINISHED,
            json!({
                "taskId": result.task_id,
                "agentId": result.agent_id,
                "error": result.error,
                "executionTimeMs": result.metadata.execution_time_ms,
            }),
        )
        .await;
        results.push(result);
    }
    results
}

/// Executes every in-progress task; `parallel` picks the node flavour.
pub struct ExecutionNode {
    ctx: Arc<NodeContext>,
    parallel: bool,
}

impl ExecutionNode {
    pub fn parallel(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            parallel: true,
        }
    }

    pub fn single(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            parallel: false,
        }
    }

    fn name(&self) -> &'static str {
        if self.parallel {
            PARALLEL_EXECUTION
        } else {
            AGENT_EXECUTION
        }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for ExecutionNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let batch: Vec<Task> = state
            .tasks_with_status(TaskStatus::InProgress)
            .cloned()
            .collect();

        let results = dispatch_tasks(&self.ctx, state, batch, self.parallel).await;
        let failed = results.iter().filter(|r| r.is_error()).count();

        let mut patch = SessionPatch::new().message(Message::from_node(
            self.name(),
            format!("Executed {} task(s), {failed} failed", results.len()),
        ));
        for result in results {
            if let Some(error) = &result.error {
                patch.errors.push(
                    ErrorRecord::new(&result.agent_id, error.clone()).for_task(&result.task_id),
                );
            }
            patch.results.push(result);
        }
        Ok(patch)
    }
}

/// Any errored result in the batch sends it to the error handler.
pub fn route_after_execution(state: &SessionState) -> String {
    if in_flight_results(state).iter().any(|r| r.is_error()) {
        ERROR_HANDLER.to_string()
    } else {
        SYNCHRONIZE.to_string()
    }
}
