//! Majority and confidence-weighted voting over result outputs.
//!
//! Outputs are grouped by their canonical serialisation, so structurally equal
//! payloads vote together. Ties go to the output seen first.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::result::{AgentResult, ResultOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    /// One vote per result.
    Majority,
    /// Each result votes with its confidence (neutral when absent).
    Weighted,
}

/// Votes collected by one distinct output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub output: ResultOutput,
    pub votes: usize,
    pub weight: f64,
    pub voters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingOutcome {
    pub method: VotingMethod,
    pub winner: Option<ResultOutput>,
    /// Vote count (majority) or confidence sum (weighted) of the winner.
    pub winner_weight: f64,
    /// One entry per distinct output, in first-seen order.
    pub tallies: Vec<VoteTally>,
    pub total_votes: usize,
}

impl VotingOutcome {
    pub fn tally_for(&self, output: &ResultOutput) -> Option<&VoteTally> {
        self.tallies.iter().find(|t| t.output.structurally_eq(output))
    }
}

/// Weighted voting when any result reports a confidence, majority otherwise.
/// Errored results do not vote.
pub fn vote(results: &[AgentResult]) -> VotingOutcome {
    let voters: Vec<&AgentResult> = results.iter().filter(|r| !r.is_error()).collect();
    let method = if voters.iter().any(|r| r.confidence.is_some()) {
        VotingMethod::Weighted
    } else {
        VotingMethod::Majority
    };
    tally(&voters, method)
}

pub fn majority_vote(results: &[AgentResult]) -> VotingOutcome {
    let voters: Vec<&AgentResult> = results.iter().filter(|r| !r.is_error()).collect();
    tally(&voters, VotingMethod::Majority)
}

pub fn weighted_vote(results: &[AgentResult]) -> VotingOutcome {
    let voters: Vec<&AgentResult> = results.iter().filter(|r| !r.is_error()).collect();
    tally(&voters, VotingMethod::Weighted)
}

fn tally(voters: &[&AgentResult], method: VotingMethod) -> VotingOutcome {
    let mut keys: Vec<String> = Vec::new();
    let mut tallies: Vec<VoteTally> = Vec::new();

    for result in voters {
        let key = result.output.canonical();
        let weight = match method {
            VotingMethod::Majority => 1.0,
            VotingMethod::Weighted => result.confidence_or_neutral(),
        };
        match keys.iter().position(|k| *k == key) {
            Some(i) => {
                let entry = &mut tallies[i];
                entry.votes += 1;
                entry.weight += weight;
                entry.voters.push(result.agent_id.clone());
            }
            None => {
                keys.push(key);
                tallies.push(VoteTally {
                    output: result.output.clone(),
                    votes: 1,
                    weight,
                    voters: vec![result.agent_id.clone()],
                });
            }
        }
    }

    // Strictly greater keeps the earliest tally on ties.
    let mut best: Option<&VoteTally> = None;
    for entry in &tallies {
        if best.map_or(true, |b| entry.weight > b.weight) {
            best = Some(entry);
        }
    }
    let winner = best.map(|b| b.output.clone());
    let winner_weight = best.map_or(0.0, |b| b.weight);

    debug!(
        method = ?method,
        candidates = tallies.len(),
        winner_weight,
        "vote tallied"
    );

    VotingOutcome {
        method,
        winner,
        winner_weight,
        tallies,
        total_votes: voters.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(agent: &str, output: &str, confidence: Option<f64>) -> AgentResult {
        let result = AgentResult::new(agent, "t1", output);
        match confidence {
            Some(c) => result.with_confidence(c),
            None => result,
        }
    }

    #[test]
    fn test_majority_when_no_confidence() {
        let outcome = vote(&[
            r("a1", "yes", None),
            r("a2", "no", None),
            r("a3", "no", None),
        ]);
        assert_eq!(outcome.method, VotingMethod::Majority);
        assert_eq!(outcome.winner, Some(ResultOutput::text("no")));
        assert_eq!(outcome.winner_weight, 2.0);
    }

    #[test]
    fn test_weighted_sums_confidence_per_output() {
        let outcome = vote(&[
            r("a1", "a", Some(0.9)),
            r("a2", "b", Some(0.8)),
            r("a3", "b", Some(0.7)),
        ]);
        assert_eq!(outcome.method, VotingMethod::Weighted);
        assert_eq!(outcome.winner, Some(ResultOutput::text("b")));
        assert!((outcome.winner_weight - 1.5).abs() < 1e-9);
        let a = outcome.tally_for(&ResultOutput::text("a")).unwrap();
        assert!((a.weight - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_ties_go_to_first_seen() {
        let outcome = vote(&[
            r("a1", "left", None),
            r("a2", "right", None),
        ]);
        assert_eq!(outcome.winner, Some(ResultOutput::text("left")));

        let outcome = vote(&[
            r("a1", "left", Some(0.6)),
            r("a2", "right", Some(0.6)),
        ]);
        assert_eq!(outcome.winner, Some(ResultOutput::text("left")));
    }

    #[test]
    fn test_structured_outputs_group_by_structure() {
        let outcome = vote(&[
            AgentResult::new("a1", "t", json!({"x": 1, "y": 2})),
            AgentResult::new("a2", "t", json!({"y": 2, "x": 1})),
            AgentResult::new("a3", "t", json!({"x": 3})),
        ]);
        assert_eq!(outcome.tallies.len(), 2);
        assert_eq!(outcome.tallies[0].votes, 2);
        assert_eq!(outcome.tallies[0].voters, vec!["a1", "a2"]);
    }

    #[test]
    fn test_errored_results_do_not_vote() {
        let outcome = vote(&[
            AgentResult::failure("a1", "t", "timeout"),
            r("a2", "ok", None),
        ]);
        assert_eq!(outcome.total_votes, 1);
        assert_eq!(outcome.winner, Some(ResultOutput::text("ok")));
    }

    #[test]
    fn test_mixed_confidence_uses_neutral_weight() {
        let outcome = vote(&[
            r("a1", "x", None),
            r("a2", "y", Some(0.4)),
        ]);
        assert_eq!(outcome.method, VotingMethod::Weighted);
        assert_eq!(outcome.winner, Some(ResultOutput::text("x")));
    }

    #[test]
    fn test_empty_input_has_no_winner() {
        let outcome = vote(&[]);
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.winner_weight, 0.0);
    }
}
