//! The `consensus` node: builds consensus and steers the next round.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{NodeContext, CONSENSUS};
use crate::consensus::build_consensus;
use crate::coordination::apply_coordination_protocols;
use crate::domain::state::{Message, Phase, SessionPatch, SessionState};
use crate::events::{publish_best_effort, CONSENSUS_BUILT};
use crate::graph::{GraphError, NodeHandler};

/// Key of the coordination plan inside `consensus_results`.
pub const COORDINATION_KEY: &str = "coordination";

pub struct ConsensusNode {
    ctx: Arc<NodeContext>,
}

impl ConsensusNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for ConsensusNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let report = build_consensus(state, self.ctx.classifier.as_ref());
        let plan = apply_coordination_protocols(state, report.agreement);
        let plan_value =
            serde_json::to_value(&plan).map_err(|e| GraphError::node_failed(CONSENSUS, e))?;

        info!(
            session_id = %state.session_id,
            agreement = report.agreement,
            strategy = %report.strategy,
            conflicts = report.conflicts.len(),
            parallelism = plan.recommended_parallelism,
            "consensus built"
        );

        publish_best_effort(
            self.ctx.publisher.as_ref(),
            &state.session_id,
            CONSENSUS_BUILT,
            json!({
                "agreement": report.agreement,
                "strategy": report.strategy.as_str(),
                "conflicts": report.conflicts.len(),
                "coordination": plan.strategy.as_str(),
            }),
        )
        .await;

        let mut patch = SessionPatch::new()
            .phase(Phase::Consensus)
            .message(Message::from_node(
                CONSENSUS,
                format!(
                    "Consensus {} with {:.1}% agreement; next round {}",
                    report.strategy, report.agreement, plan.strategy
                ),
            ));
        patch.consensus_results = report.to_entries();
        patch
            .consensus_results
            .insert(COORDINATION_KEY.to_string(), plan_value);
        patch.max_parallel_agents = Some(plan.recommended_parallelism);
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestrationConfig;
    use crate::consensus::KeywordConflictClassifier;
    use crate::domain::result::AgentResult;
    use crate::events::RecordingPublisher;
    use crate::fakes::ScriptedWorker;
    use crate::graph::GraphState;

    fn node() -> (ConsensusNode, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::new());
        let ctx = Arc::new(NodeContext {
            worker: Arc::new(ScriptedWorker::new()),
            publisher: publisher.clone(),
            classifier: Arc::new(KeywordConflictClassifier::default()),
        });
        (ConsensusNode::new(ctx), publisher)
    }

    fn state(results: Vec<AgentResult>) -> SessionState {
        let mut config = OrchestrationConfig::new("s");
        config.consensus_required = true;
        config.max_parallel_agents = 4;
        let mut s = SessionState::initial(&config, "obj", Vec::new());
        s.results = results;
        s
    }

    #[tokio::test]
    async fn test_disagreement_throttles_parallelism() {
        let mut s = state(vec![
            AgentResult::new("a", "t1", "approve"),
            AgentResult::new("b", "t2", "reject"),
        ]);
        let (node, publisher) = node();
        let patch = node.run(&s).await.unwrap();
        s.apply(patch);

        assert_eq!(s.current_phase, Phase::Consensus);
        assert_eq!(s.agreement_score(), Some(0.0));
        assert_eq!(s.max_parallel_agents, 1);
        assert_eq!(
            s.consensus_results[COORDINATION_KEY]["strategy"],
            json!("centralized-controlled")
        );
        assert_eq!(publisher.count(CONSENSUS_BUILT), 1);
    }

    #[tokio::test]
    async fn test_agreement_keeps_full_parallelism() {
        let mut s = state(vec![
            AgentResult::new("a", "t1", "same").with_confidence(0.9),
            AgentResult::new("b", "t2", "same").with_confidence(0.9),
        ]);
        let (node, _) = node();
        let patch = node.run(&s).await.unwrap();
        s.apply(patch);

        assert_eq!(s.consensus_results["consensusStrategy"], json!("unanimous"));
        assert_eq!(s.max_parallel_agents, 4);
    }
}
