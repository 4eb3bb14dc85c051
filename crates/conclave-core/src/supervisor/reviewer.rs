//! The `review` node: approves, rejects, or defers the round.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{NodeContext, REVIEW, SUPERVISOR};
use crate::domain::state::{ErrorRecord, Message, Phase, SessionPatch, SessionState};
use crate::events::{publish_best_effort, REVIEW_APPROVED, REVIEW_REJECTED};
use crate::graph::{GraphError, NodeHandler, END};

/// Agent id recorded on review rejections.
pub const REVIEWER_ID: &str = "reviewer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    /// Runnable work remains; go round again.
    Deferred { runnable: usize },
    Rejected { reason: String },
}

pub fn review(state: &SessionState) -> ReviewDecision {
    let error_count = state.errors.len();
    if error_count > state.max_retries as usize {
        return ReviewDecision::Rejected {
            reason: format!(
                "Too many errors: {error_count} recorded, retry budget is {}",
                state.max_retries
            ),
        };
    }

    let runnable = state.runnable_tasks().len();
    if runnable > 0 {
        return ReviewDecision::Deferred { runnable };
    }

    if state.consensus_required {
        if let Some(agreement) = state.agreement_score() {
            let required = state.consensus_threshold * 100.0;
            if agreement < required {
                return ReviewDecision::Rejected {
                    reason: format!(
                        "Consensus not reached: agreement {agreement:.1} is below threshold {required:.1}"
                    ),
                };
            }
        }
    }

    ReviewDecision::Approved
}

pub struct ReviewNode {
    ctx: Arc<NodeContext>,
}

impl ReviewNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for ReviewNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let decision = review(state);
        info!(session_id = %state.session_id, decision = ?decision, "round reviewed");

        let mut patch = match &decision {
            ReviewDecision::Approved => {
                publish_best_effort(
                    self.ctx.publisher.as_ref(),
                    &state.session_id,
                    REVIEW_APPROVED,
                    json!({ "agreement": state.agreement_score() }),
                )
                .await;
                SessionPatch::new()
                    .phase(Phase::Complete)
                    .message(Message::from_node(REVIEW, "Review approved"))
            }
            ReviewDecision::Deferred { runnable } => SessionPatch::new()
                .phase(Phase::Execution)
                .message(Message::from_node(
                    REVIEW,
                    format!("Review deferred: {runnable} runnable task(s) remain"),
                )),
            ReviewDecision::Rejected { reason } => {
                publish_best_effort(
                    self.ctx.publisher.as_ref(),
                    &state.session_id,
                    REVIEW_REJECTED,
                    json!({ "reason": reason }),
                )
                .await;
                SessionPatch::new()
                    .phase(Phase::Review)
                    .error(ErrorRecord::new(REVIEWER_ID, reason.clone()))
                    .message(Message::from_node(REVIEW, format!("Review rejected: {reason}")))
            }
        };

        let value = serde_json::to_value(&decision).map_err(|e| GraphError::node_failed(REVIEW, e))?;
        patch.metadata.insert("review".to_string(), value);
        Ok(patch)
    }
}

pub fn route_after_review(state: &SessionState) -> String {
    let deferred = state
        .metadata
        .get("review")
        .and_then(|r| r.get("decision"))
        .and_then(serde_json::Value::as_str)
        == Some("deferred");
    if deferred {
        SUPERVISOR.to_string()
    } else {
        END.to_string()
    }
}
