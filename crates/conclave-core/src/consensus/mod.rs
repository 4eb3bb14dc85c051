//! Consensus building over worker results.
//!
//! [`build_consensus`] votes on the session's successful results, flags and
//! resolves pairwise conflicts, scores agreement, and refines the winner. The
//! report is stored in `consensus_results` under stable camelCase keys.

pub mod agreement;
pub mod conflict;
pub mod refinement;
pub mod voting;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::coordination::{determine_coordination_strategy, CoordinationStrategy};
use crate::domain::result::{AgentResult, ResultOutput};
use crate::domain::state::{SessionState, AGREEMENT_KEY};

pub use agreement::calculate_weighted_agreement;
pub use conflict::{
    detect_conflict, detect_conflicts, resolve_conflict, Conflict, ConflictClassifier,
    ConflictKind, KeywordConflictClassifier, Resolution, ResolutionMethod,
};
pub use refinement::refine_result;
pub use voting::{majority_vote, vote, weighted_vote, VoteTally, VotingMethod, VotingOutcome};

/// Confidence every result needs for a unanimous verdict.
pub const UNANIMOUS_CONFIDENCE: f64 = 0.8;

/// Unanimous, or the coordination strategy implied by the agreement score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusStrategy {
    Unanimous,
    #[serde(untagged)]
    Coordinated(CoordinationStrategy),
}

impl ConsensusStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Coordinated(strategy) => strategy.as_str(),
        }
    }
}

impl std::fmt::Display for ConsensusStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusReport {
    pub voting: VotingOutcome,
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
    pub refined_result: Option<ResultOutput>,
    pub strategy: ConsensusStrategy,
    /// In `[0, 100]`.
    pub agreement: f64,
}

impl ConsensusReport {
    /// Entries for `SessionState::consensus_results`.
    pub fn to_entries(&self) -> BTreeMap<String, serde_json::Value> {
        fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
        }
        BTreeMap::from([
            ("votingResult".to_string(), to_value(&self.voting)),
            ("conflicts".to_string(), to_value(&self.conflicts)),
            ("resolutions".to_string(), to_value(&self.resolutions)),
            (
                "refinedResult".to_string(),
                self.refined_result
                    .as_ref()
                    .map_or(serde_json::Value::Null, ResultOutput::as_value),
            ),
            ("consensusStrategy".to_string(), json!(self.strategy.as_str())),
            (AGREEMENT_KEY.to_string(), json!(self.agreement)),
        ])
    }
}

fn is_unanimous(results: &[AgentResult]) -> bool {
    let Some(first) = results.first() else {
        return false;
    };
    results.iter().all(|r| {
        r.output.structurally_eq(&first.output)
            && r.confidence.is_some_and(|c| c >= UNANIMOUS_CONFIDENCE)
    })
}

/// Aggregate the session's successful results into one report.
pub fn build_consensus(
    state: &SessionState,
    classifier: &dyn ConflictClassifier,
) -> ConsensusReport {
    let successful: Vec<AgentResult> = state
        .results
        .iter()
        .filter(|r| !r.is_error())
        .cloned()
        .collect();
    let priority_of = |id: &str| state.agent_priority(id);

    let voting = vote(&successful);
    let conflicts = detect_conflicts(&successful, classifier);
    let resolutions = conflicts
        .iter()
        .map(|c| resolve_conflict(c, priority_of))
        .collect();
    let agreement = calculate_weighted_agreement(&successful, priority_of);
    let refined_result = voting
        .winner
        .as_ref()
        .map(|winner| refine_result(winner, &successful));

    let strategy = if is_unanimous(&successful) {
        ConsensusStrategy::Unanimous
    } else {
        ConsensusStrategy::Coordinated(determine_coordination_strategy(agreement))
    };

    ConsensusReport {
        voting,
        conflicts,
        resolutions,
        refined_result,
        strategy,
        agreement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestrationConfig;
    use crate::domain::agent::{Agent, AgentRole};

    fn state_with(results: Vec<AgentResult>) -> SessionState {
        let agents = vec![
            Agent::new("a1", "One", AgentRole::Analyzer).with_priority(9),
            Agent::new("a2", "Two", AgentRole::Analyzer).with_priority(4),
            Agent::new("a3", "Three", AgentRole::Analyzer),
        ];
        let mut state = SessionState::initial(&OrchestrationConfig::new("s"), "obj", agents);
        state.results = results;
        state
    }

    #[test]
    fn test_unanimous_high_confidence() {
        let state = state_with(vec![
            AgentResult::new("a1", "t1", "approve").with_confidence(0.9),
            AgentResult::new("a2", "t2", "approve").with_confidence(0.85),
        ]);
        let report = build_consensus(&state, &KeywordConflictClassifier::default());
        assert_eq!(report.strategy, ConsensusStrategy::Unanimous);
        assert_eq!(report.agreement, 100.0);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_identical_but_low_confidence_is_not_unanimous() {
        let state = state_with(vec![
            AgentResult::new("a1", "t1", "same").with_confidence(0.9),
            AgentResult::new("a2", "t2", "same").with_confidence(0.5),
        ]);
        let report = build_consensus(&state, &KeywordConflictClassifier::default());
        assert_eq!(
            report.strategy,
            ConsensusStrategy::Coordinated(CoordinationStrategy::DecentralizedAutonomous)
        );
    }

    #[test]
    fn test_contradiction_resolved_by_priority() {
        let state = state_with(vec![
            AgentResult::new("a1", "t1", "accept the proposal"),
            AgentResult::new("a2", "t2", "reject the proposal"),
            AgentResult::failure("a3", "t3", "timeout"),
        ]);
        let report = build_consensus(&state, &KeywordConflictClassifier::default());
        assert_eq!(report.voting.total_votes, 2);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.resolutions[0].winner.as_deref(), Some("a1"));
        assert_eq!(report.agreement, 0.0);
        assert_eq!(
            report.strategy,
            ConsensusStrategy::Coordinated(CoordinationStrategy::CentralizedControlled)
        );
    }

    #[test]
    fn test_entries_use_stable_keys() {
        let state = state_with(vec![AgentResult::new("a1", "t1", "x")]);
        let entries = build_consensus(&state, &KeywordConflictClassifier::default()).to_entries();
        for key in [
            "votingResult",
            "conflicts",
            "resolutions",
            "refinedResult",
            "consensusStrategy",
            "agreement",
        ] {
            assert!(entries.contains_key(key), "missing {key}");
        }
        assert_eq!(entries["agreement"], json!(100.0));
    }

    #[test]
    fn test_strategy_serializes_as_plain_string() {
        let json = serde_json::to_value(ConsensusStrategy::Coordinated(
            CoordinationStrategy::HybridSupervised,
        ))
        .unwrap();
        assert_eq!(json, json!("hybrid-supervised"));
        assert_eq!(
            serde_json::to_value(ConsensusStrategy::Unanimous).unwrap(),
            json!("unanimous")
        );
    }
}
