//! Orchestration service: the public entry point.
//!
//! [`Orchestrator`] owns the agent catalog and the external collaborators,
//! compiles the supervisor graph per call, and persists a checkpoint after
//! every node transition. `execute` and `resume` always resolve to an
//! [`ExecutionOutcome`]; only a missing checkpoint or a corrupt snapshot makes
//! `resume` fail.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conclave_state::{Checkpoint, CheckpointStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn, Instrument};

use crate::config::{OrchestrationConfig, ResumeOverrides, DEFAULT_MAX_RECURSION};
use crate::consensus::{ConflictClassifier, KeywordConflictClassifier};
use crate::domain::agent::{Agent, AgentCatalog};
use crate::domain::error::{OrchestrationError, Result};
use crate::domain::result::AgentResult;
use crate::domain::state::{Message, Phase, SessionState};
use crate::domain::task::{Task, TaskStatus};
use crate::events::{
    publish_best_effort, EventPublisher, TracingPublisher, SESSION_FINISHED, SESSION_STARTED,
};
use crate::graph::{Checkpointer, GraphError, GraphStructure, RunOptions, StopReason};
use crate::metrics::METRICS;
use crate::obs;
use crate::supervisor::planner::{assess_feasibility, Feasibility};
use crate::supervisor::{build_supervisor_graph, entry_node_for, NodeContext};
use crate::worker::WorkerExecutor;

/// What a caller gets back from `execute` or `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The session reached the complete phase.
    pub success: bool,
    pub state: SessionState,
    pub messages: Vec<Message>,
    pub results: Vec<AgentResult>,
    /// Every recorded task error, review rejection, and call-level failure.
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
    pub steps: usize,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl ExecutionOutcome {
    fn from_state(
        state: SessionState,
        extra_errors: Vec<String>,
        steps: usize,
        stop_reason: Option<StopReason>,
        started: Instant,
    ) -> Self {
        let mut errors: Vec<String> = state.errors.iter().map(|e| e.error.clone()).collect();
        errors.extend(extra_errors);
        Self {
            success: state.current_phase == Phase::Complete,
            messages: state.messages.clone(),
            results: state.results.clone(),
            errors,
            execution_time_ms: started.elapsed().as_millis() as u64,
            steps,
            stop_reason,
            state,
        }
    }
}

/// Task progress for one stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: Phase,
    pub checkpoint_count: u64,
    pub retry_count: u32,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub tasks: Vec<Task>,
}

impl SessionStatus {
    fn of(state: SessionState) -> Self {
        let count = |status| state.tasks_with_status(status).count();
        Self {
            session_id: state.session_id.clone(),
            phase: state.current_phase,
            checkpoint_count: state.checkpoint_count,
            retry_count: state.retry_count,
            pending: count(TaskStatus::Pending),
            in_progress: count(TaskStatus::InProgress),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            tasks: state.tasks,
        }
    }
}

/// Writes a [`Checkpoint`] through a [`CheckpointStore`] after each step.
struct StoreCheckpointer<'a> {
    store: &'a dyn CheckpointStore,
}

#[async_trait]
impl Checkpointer<SessionState> for StoreCheckpointer<'_> {
    async fn save(
        &self,
        state: &SessionState,
        next_node: Option<&str>,
        sequence: u64,
    ) -> std::result::Result<(), GraphError> {
        let snapshot =
            serde_json::to_value(state).map_err(|e| GraphError::Checkpoint(e.to_string()))?;
        let checkpoint = Checkpoint::new(
            &state.session_id,
            sequence,
            next_node.map(str::to_string),
            state.current_phase.to_string(),
            snapshot,
        )
        .map_err(|e| GraphError::Checkpoint(e.to_string()))?;
        self.store
            .put(&state.session_id, checkpoint)
            .await
            .map_err(|e| GraphError::Checkpoint(e.to_string()))?;
        METRICS.inc_checkpoints_written();
        Ok(())
    }
}

/// Supervisor orchestration service.
pub struct Orchestrator {
    catalog: RwLock<AgentCatalog>,
    worker: Arc<dyn WorkerExecutor>,
    store: Arc<dyn CheckpointStore>,
    publisher: Arc<dyn EventPublisher>,
    classifier: Arc<dyn ConflictClassifier>,
}

impl Orchestrator {
    /// Service with the default specialist catalog.
    pub fn new(worker: Arc<dyn WorkerExecutor>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            catalog: RwLock::new(AgentCatalog::default_specialists()),
            worker,
            store,
            publisher: Arc::new(TracingPublisher),
            classifier: Arc::new(KeywordConflictClassifier::default()),
        }
    }

    pub fn with_catalog(mut self, catalog: AgentCatalog) -> Self {
        self.catalog = RwLock::new(catalog);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ConflictClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    fn node_context(&self) -> Arc<NodeContext> {
        Arc::new(NodeContext {
            worker: Arc::clone(&self.worker),
            publisher: Arc::clone(&self.publisher),
            classifier: Arc::clone(&self.classifier),
        })
    }

    /// Run `objective` to completion, failure, or the step budget.
    ///
    /// `custom_agents` replaces the catalog for this session only.
    pub async fn execute(
        &self,
        objective: &str,
        config: OrchestrationConfig,
        custom_agents: Option<Vec<Agent>>,
    ) -> ExecutionOutcome {
        let span = obs::session_span(&config.session_id);
        self.execute_inner(objective, config, custom_agents)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        objective: &str,
        config: OrchestrationConfig,
        custom_agents: Option<Vec<Agent>>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let agents = match custom_agents {
            Some(agents) => agents,
            None => self.catalog.read().await.agents().to_vec(),
        };
        let mut state = SessionState::initial(&config, objective, agents);

        if let Err(e) = validate_session(&config, &state) {
            warn!(error = %e, "session rejected before start");
            return ExecutionOutcome::from_state(state, vec![e.to_string()], 0, None, started);
        }

        state.checkpoint_count = self.sequence_floor(&config.session_id).await;

        obs::emit_session_started(&state.session_id, objective, state.available_agents.len());
        publish_best_effort(
            self.publisher.as_ref(),
            &state.session_id,
            SESSION_STARTED,
            json!({ "objective": objective, "agents": state.available_agents.len() }),
        )
        .await;

        self.drive(state, None, config.max_recursion, config.timeout_ms, started)
            .await
    }

    /// Continue a stored session from its latest checkpoint.
    pub async fn resume(
        &self,
        session_id: &str,
        overrides: ResumeOverrides,
    ) -> Result<ExecutionOutcome> {
        self.resume_inner(session_id, overrides)
            .instrument(obs::session_span(session_id))
            .await
    }

    async fn resume_inner(
        &self,
        session_id: &str,
        overrides: ResumeOverrides,
    ) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let checkpoint = self.latest_checkpoint(session_id).await?;
        let mut state: SessionState = serde_json::from_value(checkpoint.state.clone())?;
        state.checkpoint_count = state.checkpoint_count.max(checkpoint.sequence);
        apply_overrides(&mut state, &overrides)?;

        let start = checkpoint
            .next_node
            .clone()
            .or_else(|| entry_node_for(state.current_phase).map(str::to_string));
        let Some(start) = start else {
            info!(phase = %state.current_phase, "session already complete");
            return Ok(ExecutionOutcome::from_state(
                state,
                Vec::new(),
                0,
                None,
                started,
            ));
        };

        info!(start = %start, sequence = checkpoint.sequence, "resuming session");
        let max_steps = overrides.max_recursion.unwrap_or(DEFAULT_MAX_RECURSION);
        Ok(self
            .drive(state, Some(start), max_steps, overrides.timeout_ms, started)
            .await)
    }

    async fn drive(
        &self,
        state: SessionState,
        start: Option<String>,
        max_steps: usize,
        timeout_ms: Option<u64>,
        started: Instant,
    ) -> ExecutionOutcome {
        let session_id = state.session_id.clone();
        let graph = match build_supervisor_graph(self.node_context()) {
            Ok(graph) => graph,
            Err(e) => {
                return ExecutionOutcome::from_state(state, vec![e.to_string()], 0, None, started)
            }
        };

        let checkpointer = StoreCheckpointer {
            store: self.store.as_ref(),
        };
        let mut options = RunOptions::new(&session_id, max_steps).with_checkpointer(&checkpointer);
        if let Some(start) = start {
            options = options.starting_at(start);
        }

        let run = graph.run(state.clone(), options);
        let finished = match timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), run)
                .await
                .map_err(|_| ms),
            None => Ok(run.await),
        };

        let outcome = match finished {
            Ok(Ok(run)) => ExecutionOutcome::from_state(
                run.state,
                Vec::new(),
                run.steps,
                Some(run.stop_reason),
                started,
            ),
            Ok(Err(e)) => {
                warn!(error = %e, "graph run failed");
                let latest = self.latest_state(&session_id).await.unwrap_or(state);
                ExecutionOutcome::from_state(latest, vec![e.to_string()], 0, None, started)
            }
            Err(ms) => {
                warn!(timeout_ms = ms, "session timed out");
                let latest = self.latest_state(&session_id).await.unwrap_or(state);
                ExecutionOutcome::from_state(
                    latest,
                    vec![format!("timeout: session exceeded {ms}ms")],
                    0,
                    None,
                    started,
                )
            }
        };

        obs::emit_session_finished(
            &session_id,
            outcome.execution_time_ms,
            outcome.steps,
            outcome.success,
        );
        publish_best_effort(
            self.publisher.as_ref(),
            &session_id,
            SESSION_FINISHED,
            json!({
                "success": outcome.success,
                "phase": outcome.state.current_phase,
                "steps": outcome.steps,
                "executionTimeMs": outcome.execution_time_ms,
            }),
        )
        .await;
        METRICS.flush();
        outcome
    }

    /// Sequence the next run continues from. When the stored history cannot
    /// be sized it is dropped, so the new run's checkpoints are the only ones.
    async fn sequence_floor(&self, session_id: &str) -> u64 {
        match self.store.latest_sequence(session_id).await {
            Ok(latest) => latest.unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "checkpoint lookup failed, discarding history");
                if let Err(e) = self.store.delete(session_id).await {
                    warn!(error = %e, "could not discard checkpoint history");
                }
                0
            }
        }
    }

    async fn latest_checkpoint(&self, session_id: &str) -> Result<Checkpoint> {
        let checkpoint = match self.store.get(session_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id, error = %e, "checkpoint lookup failed");
                None
            }
        };
        let checkpoint = checkpoint.ok_or_else(|| OrchestrationError::CheckpointNotFound {
            session_id: session_id.to_string(),
        })?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    async fn latest_state(&self, session_id: &str) -> Option<SessionState> {
        let checkpoint = self.latest_checkpoint(session_id).await.ok()?;
        serde_json::from_value(checkpoint.state).ok()
    }

    /// Task counts and statuses from the latest checkpoint.
    pub async fn get_task_status(&self, session_id: &str) -> Result<SessionStatus> {
        let checkpoint = self.latest_checkpoint(session_id).await?;
        let state: SessionState = serde_json::from_value(checkpoint.state)?;
        Ok(SessionStatus::of(state))
    }

    /// Keyword coverage of `objective` by the current catalog.
    pub async fn can_handle_objective(&self, objective: &str) -> Feasibility {
        assess_feasibility(objective, self.catalog.read().await.agents())
    }

    pub fn get_graph_structure(&self) -> Result<GraphStructure> {
        Ok(build_supervisor_graph(self.node_context())?.structure())
    }

    pub async fn add_agent(&self, agent: Agent) -> Result<()> {
        self.catalog.write().await.add(agent)
    }

    pub async fn remove_agent(&self, agent_id: &str) -> Result<Agent> {
        self.catalog
            .write()
            .await
            .remove(agent_id)
            .ok_or_else(|| OrchestrationError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.catalog.read().await.agents().to_vec()
    }

    /// Forget every stored checkpoint of the session.
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.store.delete(session_id).await?;
        info!(session_id, "session cleared");
        Ok(())
    }
}

fn validate_session(config: &OrchestrationConfig, state: &SessionState) -> Result<()> {
    config.validate()?;
    if state.objective.trim().is_empty() {
        return Err(OrchestrationError::InvalidConfig(
            "objective must not be empty".to_string(),
        ));
    }
    AgentCatalog::from_agents(state.available_agents.clone())?;
    Ok(())
}

fn apply_overrides(state: &mut SessionState, overrides: &ResumeOverrides) -> Result<()> {
    if let Some(threshold) = overrides.consensus_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(OrchestrationError::InvalidConfig(format!(
                "consensus_threshold must be within [0, 1], got {threshold}"
            )));
        }
        state.consensus_threshold = threshold;
    }
    if let Some(parallel) = overrides.max_parallel_agents {
        if parallel == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "max_parallel_agents must be at least 1".to_string(),
            ));
        }
        state.parallelism_ceiling = parallel;
        state.max_parallel_agents = parallel;
    }
    if let Some(required) = overrides.consensus_required {
        state.consensus_required = required;
    }
    if let Some(timeout) = overrides.agent_timeout_ms {
        state.agent_timeout_ms = timeout;
    }
    if let Some(max_retries) = overrides.max_retries {
        if max_retries < state.retry_count {
            return Err(OrchestrationError::InvalidConfig(format!(
                "max_retries {max_retries} is below the {} retries already spent",
                state.retry_count
            )));
        }
        state.max_retries = max_retries;
    }
    if overrides.max_recursion == Some(0) {
        return Err(OrchestrationError::InvalidConfig(
            "max_recursion must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRole;
    use crate::fakes::ScriptedWorker;
    use conclave_state::fakes::MemoryCheckpointStore;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Arc::new(ScriptedWorker::new()),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    #[tokio::test]
    async fn test_invalid_config_resolves_unsuccessfully() {
        let outcome = orchestrator()
            .execute("Research things", OrchestrationConfig::new(""), None)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.steps, 0);
        assert!(outcome.errors[0].contains("session_id"));
    }

    #[tokio::test]
    async fn test_duplicate_custom_agents_rejected() {
        let agents = vec![
            Agent::new("a", "A", AgentRole::Researcher),
            Agent::new("a", "B", AgentRole::Writer),
        ];
        let outcome = orchestrator()
            .execute("Research", OrchestrationConfig::new("s"), Some(agents))
            .await;
        assert!(!outcome.success);
        assert!(outcome.errors[0].contains("duplicate agent"));
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint_fails() {
        let err = orchestrator()
            .resume("nope", ResumeOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::CheckpointNotFound { .. }));
    }

    #[tokio::test]
    async fn test_catalog_mutators() {
        let orch = orchestrator();
        assert_eq!(orch.list_agents().await.len(), 4);
        orch.add_agent(Agent::new("coord", "Coordinator", AgentRole::Coordinator))
            .await
            .unwrap();
        assert!(orch.add_agent(Agent::new("coord", "Again", AgentRole::Coordinator)).await.is_err());
        assert_eq!(orch.remove_agent("coord").await.unwrap().id, "coord");
        assert!(matches!(
            orch.remove_agent("coord").await,
            Err(OrchestrationError::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_feasibility_uses_catalog() {
        let orch = orchestrator();
        let f = orch.can_handle_objective("Research and write a report").await;
        assert!(f.can_handle);
        assert_eq!(f.confidence, 1.0);
    }

    #[test]
    fn test_graph_structure_lists_nodes() {
        let structure = orchestrator().get_graph_structure().unwrap();
        assert_eq!(structure.entry_point, "planning");
        assert_eq!(structure.nodes.len(), 8);
    }

    #[test]
    fn test_overrides_validate() {
        let mut state =
            SessionState::initial(&OrchestrationConfig::new("s"), "obj", Vec::new());
        state.retry_count = 2;
        apply_overrides(
            &mut state,
            &ResumeOverrides {
                max_retries: Some(2),
                max_parallel_agents: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.max_retries, 2);
        assert_eq!(state.parallelism_ceiling, 5);

        let lowered = ResumeOverrides {
            max_retries: Some(1),
            ..Default::default()
        };
        let err = apply_overrides(&mut state, &lowered).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.max_retries, 2);

        let bad = ResumeOverrides {
            consensus_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(apply_overrides(&mut state, &bad).is_err());
    }
}
