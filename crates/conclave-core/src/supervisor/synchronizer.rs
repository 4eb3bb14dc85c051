//! Folds a finished batch back into task state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use super::execution::in_flight_results;
use super::{NodeContext, CONSENSUS, REVIEW, SYNCHRONIZE};
use crate::consensus::{detect_conflicts, Conflict, ConflictClassifier};
use crate::domain::error::Result;
use crate::domain::result::AgentResult;
use crate::domain::state::{Message, SessionPatch, SessionState};
use crate::domain::task::{Task, TaskStatus};
use crate::graph::{GraphError, NodeHandler};

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Tasks whose status changed, ready for a patch.
    pub tasks: Vec<Task>,
    pub synchronized_count: usize,
    pub conflicts: Vec<Conflict>,
}

/// Mark each in-progress task with a result as completed, or failed when the
/// result carries an error. Conflicts across the batch are reported only.
pub fn synchronize_parallel_results(
    tasks: &[Task],
    results: &[&AgentResult],
    classifier: &dyn ConflictClassifier,
    now: DateTime<Utc>,
) -> Result<SyncReport> {
    let mut updated = Vec::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::InProgress) {
        let Some(result) = results.iter().rev().find(|r| r.task_id == task.task_id) else {
            continue;
        };
        let mut task = task.clone();
        if result.is_error() {
            task.fail(now)?;
        } else {
            task.complete(now)?;
        }
        updated.push(task);
    }

    let batch: Vec<AgentResult> = results.iter().map(|r| (*r).clone()).collect();
    Ok(SyncReport {
        synchronized_count: updated.len(),
        tasks: updated,
        conflicts: detect_conflicts(&batch, classifier),
    })
}

pub struct SynchronizeNode {
    ctx: Arc<NodeContext>,
}

impl SynchronizeNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for SynchronizeNode {
    async fn run(&self, state: &SessionState) -> std::result::Result<SessionPatch, GraphError> {
        let report = synchronize_parallel_results(
            &state.tasks,
            &in_flight_results(state),
            self.ctx.classifier.as_ref(),
            Utc::now(),
        )
        .map_err(|e| GraphError::node_failed(SYNCHRONIZE, e))?;

        debug!(
            session_id = %state.session_id,
            synchronized = report.synchronized_count,
            conflicts = report.conflicts.len(),
            "batch synchronized"
        );

        let mut patch = SessionPatch::new().message(Message::from_node(
            SYNCHRONIZE,
            format!(
                "Synchronized {} task(s), {} conflict(s)",
                report.synchronized_count,
                report.conflicts.len()
            ),
        ));
        patch.metadata.insert(
            "lastSynchronization".to_string(),
            json!({
                "synchronizedCount": report.synchronized_count,
                "conflicts": report.conflicts,
            }),
        );
        patch.tasks = report.tasks;
        Ok(patch)
    }
}

pub fn route_after_synchronize(state: &SessionState) -> String {
    let successful = state.results.iter().filter(|r| !r.is_error()).count();
    if state.consensus_required && successful > 1 {
        CONSENSUS.to_string()
    } else {
        REVIEW.to_string()
    }
}
