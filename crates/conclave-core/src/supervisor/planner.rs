//! Keyword planner: objective plus agent catalog in, task list out.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::NodeContext;
use crate::domain::agent::{Agent, AgentRole};
use crate::domain::state::{Message, Phase, SessionPatch, SessionState};
use crate::domain::task::{Task, TaskPriority};
use crate::events::{publish_best_effort, TASKS_PLANNED};
use crate::graph::{GraphError, NodeHandler};

/// Roles implied by the objective's wording, in planning order.
pub fn required_roles(objective: &str) -> Vec<(AgentRole, TaskPriority)> {
    let text = objective.to_lowercase();
    let mut roles = Vec::new();
    if text.contains("research") {
        roles.push((AgentRole::Researcher, TaskPriority::High));
    }
    if text.contains("analy") {
        roles.push((AgentRole::Analyzer, TaskPriority::Medium));
    }
    if ["write", "create", "report", "draft"]
        .iter()
        .any(|k| text.contains(k))
    {
        roles.push((AgentRole::Writer, TaskPriority::Medium));
    }
    roles
}

fn find_agent(agents: &[Agent], role: AgentRole) -> Option<&Agent> {
    agents.iter().find(|a| a.role == role && a.is_available())
}

fn verb(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Researcher => "Research",
        AgentRole::Analyzer => "Analyze",
        AgentRole::Writer => "Write up",
        AgentRole::Reviewer => "Review the work for",
        AgentRole::Coordinator => "Coordinate",
    }
}

fn task_for(index: usize, agent: &Agent, priority: TaskPriority, objective: &str) -> Task {
    Task::new(
        format!("task-{index}-{}", agent.role),
        agent.id.clone(),
        format!("{}: {objective}", verb(agent.role)),
        priority,
    )
    .with_context("objective", json!(objective))
    .with_context("role", json!(agent.role.as_str()))
}

/// Build the initial task list.
///
/// One task per matched role, assigned to the first available agent with that
/// role. Roles with no agent are skipped. A low-priority review task that
/// depends on every other task is appended when a reviewer is available.
pub fn plan_tasks(objective: &str, agents: &[Agent]) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::new();
    for (role, priority) in required_roles(objective) {
        match find_agent(agents, role) {
            Some(agent) => tasks.push(task_for(tasks.len() + 1, agent, priority, objective)),
            None => debug!(role = %role, "no agent for role, skipping"),
        }
    }

    if let Some(reviewer) = find_agent(agents, AgentRole::Reviewer) {
        let deps: Vec<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        tasks.push(
            task_for(tasks.len() + 1, reviewer, TaskPriority::Low, objective)
                .with_dependencies(deps),
        );
    }
    tasks
}

/// Keyword coverage of an objective by a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feasibility {
    pub can_handle: bool,
    /// Share of required roles covered, in `[0, 1]`.
    pub confidence: f64,
    pub required_roles: Vec<AgentRole>,
    pub missing_roles: Vec<AgentRole>,
    pub matched_agents: Vec<String>,
}

/// Estimate whether `agents` can carry out `objective`.
///
/// An objective with no recognised keywords is feasible at neutral
/// confidence when the catalog has any available agent.
pub fn assess_feasibility(objective: &str, agents: &[Agent]) -> Feasibility {
    let required: Vec<AgentRole> = required_roles(objective)
        .into_iter()
        .map(|(role, _)| role)
        .collect();
    let mut missing = Vec::new();
    let mut matched = Vec::new();
    for role in &required {
        match find_agent(agents, *role) {
            Some(agent) => matched.push(agent.id.clone()),
            None => missing.push(*role),
        }
    }

    let confidence = if required.is_empty() {
        if agents.iter().any(Agent::is_available) {
            0.5
        } else {
            0.0
        }
    } else {
        matched.len() as f64 / required.len() as f64
    };

    Feasibility {
        can_handle: confidence >= 0.5,
        confidence,
        required_roles: required,
        missing_roles: missing,
        matched_agents: matched,
    }
}

pub struct PlanningNode {
    ctx: Arc<NodeContext>,
}

impl PlanningNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl NodeHandler<SessionState> for PlanningNode {
    async fn run(&self, state: &SessionState) -> Result<SessionPatch, GraphError> {
        let tasks = plan_tasks(&state.objective, &state.available_agents);
        info!(
            session_id = %state.session_id,
            tasks = tasks.len(),
            "objective planned"
        );

        let summary: Vec<String> = tasks
            .iter()
            .map(|t| format!("{} -> {} ({})", t.task_id, t.agent_id, t.priority))
            .collect();
        publish_best_effort(
            self.ctx.publisher.as_ref(),
            &state.session_id,
            TASKS_PLANNED,
            json!({ "tasks": summary }),
        )
        .await;

        let mut patch = SessionPatch::new()
            .phase(Phase::Execution)
            .message(Message::from_node(
                super::PLANNING,
                format!("Planned {} task(s): {}", tasks.len(), summary.join(", ")),
            ));
        patch.tasks = tasks;
        Ok(patch)
    }
}
