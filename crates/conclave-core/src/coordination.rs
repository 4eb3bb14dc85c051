//! Coordination protocol: resource allocation, task ordering, and strategy
//! selection driven by the agreement score.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::agent::{Agent, AgentRole};
use crate::domain::result::AgentResult;
use crate::domain::state::SessionState;
use crate::domain::task::{Task, TaskStatus};

/// Agents at or above this priority may call external APIs.
pub const API_ACCESS_PRIORITY: u8 = 9;

/// How tightly the next round is supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinationStrategy {
    DecentralizedAutonomous,
    HybridSupervised,
    CentralizedControlled,
}

impl CoordinationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DecentralizedAutonomous => "decentralized-autonomous",
            Self::HybridSupervised => "hybrid-supervised",
            Self::CentralizedControlled => "centralized-controlled",
        }
    }

    /// Fan-out for the next round given the configured ceiling.
    pub fn recommended_parallelism(self, ceiling: usize) -> usize {
        let ceiling = ceiling.max(1);
        match self {
            Self::DecentralizedAutonomous => ceiling,
            Self::HybridSupervised => ceiling.div_ceil(2),
            Self::CentralizedControlled => 1,
        }
    }
}

impl std::fmt::Display for CoordinationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `>= 80` decentralized, `>= 50` hybrid, otherwise centralized.
pub fn determine_coordination_strategy(agreement: f64) -> CoordinationStrategy {
    if agreement >= 80.0 {
        CoordinationStrategy::DecentralizedAutonomous
    } else if agreement >= 50.0 {
        CoordinationStrategy::HybridSupervised
    } else {
        CoordinationStrategy::CentralizedControlled
    }
}

/// Capability tags granted to each agent, keyed by agent id.
pub fn allocate_resources(agents: &[Agent]) -> BTreeMap<String, BTreeSet<String>> {
    agents
        .iter()
        .map(|agent| {
            let mut tags: BTreeSet<String> = match agent.role {
                AgentRole::Researcher => ["database-access", "external-services"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                AgentRole::Analyzer => BTreeSet::from(["memory-store".to_string()]),
                AgentRole::Writer => BTreeSet::from(["file-system".to_string()]),
                AgentRole::Reviewer | AgentRole::Coordinator => BTreeSet::new(),
            };
            if agent.priority >= API_ACCESS_PRIORITY {
                tags.insert("api-calls".to_string());
            }
            (agent.id.clone(), tags)
        })
        .collect()
}

fn status_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::InProgress => 0,
        TaskStatus::Pending => 1,
        TaskStatus::Completed | TaskStatus::Failed => 2,
    }
}

fn best_confidence(task: &Task, results: &[AgentResult]) -> Option<f64> {
    results
        .iter()
        .filter(|r| r.task_id == task.task_id)
        .filter_map(|r| r.confidence)
        .max_by(f64::total_cmp)
}

/// Stable ordering: in-progress before pending, then priority, then fewer
/// unmet dependencies, then higher recorded confidence.
pub fn prioritize_tasks(tasks: &[Task], results: &[AgentResult]) -> Vec<Task> {
    let mut keyed: Vec<(u8, u8, usize, f64, &Task)> = tasks
        .iter()
        .map(|t| {
            (
                status_rank(t.status),
                t.priority.rank(),
                t.unmet_dependencies(tasks).len(),
                best_confidence(t, results).unwrap_or(f64::NEG_INFINITY),
                t,
            )
        })
        .collect();

    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
            .then(b.3.total_cmp(&a.3))
    });
    keyed.into_iter().map(|(_, _, _, _, t)| t.clone()).collect()
}

/// Steering decision for the next round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    pub strategy: CoordinationStrategy,
    pub agreement: f64,
    pub resource_allocation: BTreeMap<String, BTreeSet<String>>,
    /// Task ids in dispatch order.
    pub task_order: Vec<String>,
    pub recommended_parallelism: usize,
}

/// Compose allocation, prioritization, and strategy selection.
pub fn apply_coordination_protocols(state: &SessionState, agreement: f64) -> CoordinationPlan {
    let strategy = determine_coordination_strategy(agreement);
    CoordinationPlan {
        strategy,
        agreement,
        resource_allocation: allocate_resources(&state.available_agents),
        task_order: prioritize_tasks(&state.tasks, &state.results)
            .into_iter()
            .map(|t| t.task_id)
            .collect(),
        recommended_parallelism: strategy.recommended_parallelism(state.parallelism_ceiling),
    }
}
