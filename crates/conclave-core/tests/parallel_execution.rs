//! Fan-out behaviour: timeouts, failure isolation, and the parallelism cap.

use std::sync::Arc;
use std::time::Duration;

use conclave_core::fakes::ScriptedWorker;
use conclave_core::worker::WorkerError;
use conclave_core::{
    Agent, AgentRole, OrchestrationConfig, Orchestrator, Phase, TaskStatus,
};
use conclave_state::fakes::MemoryCheckpointStore;

fn team() -> Vec<Agent> {
    vec![
        Agent::new("researcher", "Researcher", AgentRole::Researcher),
        Agent::new("analyzer", "Analyzer", AgentRole::Analyzer),
        Agent::new("writer", "Writer", AgentRole::Writer),
        Agent::new("reviewer", "Reviewer", AgentRole::Reviewer),
    ]
}

const OBJECTIVE: &str = "Research, analyze and write a report on battery recycling";

#[tokio::test(start_paused = true)]
async fn timed_out_task_does_not_block_siblings() {
    let worker = Arc::new(
        ScriptedWorker::new()
            .slow("researcher", Duration::from_secs(60), "too late")
            .reply("analyzer", "analysis", Some(0.8))
            .reply("writer", "draft", Some(0.7)),
    );
    let orch = Orchestrator::new(worker.clone(), Arc::new(MemoryCheckpointStore::new()));

    let mut config = OrchestrationConfig::new("par-timeout");
    config.agent_timeout_ms = 1_000;
    let outcome = orch.execute(OBJECTIVE, config, Some(team())).await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);

    let timed_out = outcome
        .results
        .iter()
        .find(|r| r.task_id == "task-1-researcher")
        .unwrap();
    assert!(timed_out.error.as_deref().unwrap().contains("timeout"));
    assert!(timed_out.metadata.timed_out);

    for sibling in ["task-2-analyzer", "task-3-writer"] {
        let result = outcome.results.iter().find(|r| r.task_id == sibling).unwrap();
        assert!(result.error.is_none(), "{sibling} should succeed");
        assert!(result.metadata.parallel_execution);
    }

    // The timeout was retried once under a fresh task id.
    let retry = outcome.state.task("task-1-researcher#retry1").unwrap();
    assert_eq!(retry.status, TaskStatus::Completed);
    assert_eq!(outcome.state.task("task-1-researcher").unwrap().status, TaskStatus::Failed);
    assert_eq!(outcome.state.retry_count, 1);
    assert_eq!(worker.calls_for("researcher"), 2);
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn fan_out_never_exceeds_cap() {
    let worker = Arc::new(
        ScriptedWorker::new()
            .slow("researcher", Duration::from_millis(20), "r")
            .slow("analyzer", Duration::from_millis(20), "a")
            .slow("writer", Duration::from_millis(20), "w"),
    );
    let orch = Orchestrator::new(worker.clone(), Arc::new(MemoryCheckpointStore::new()));

    let mut config = OrchestrationConfig::new("par-cap");
    config.max_parallel_agents = 2;
    let outcome = orch.execute(OBJECTIVE, config, Some(team())).await;

    assert!(outcome.success, "errors: {:?}", outcome.errors);
    assert!(worker.peak_in_flight() <= 2);
    assert_eq!(outcome.results.len(), 4);
}

#[tokio::test]
async fn cap_of_one_runs_tasks_one_at_a_time() {
    let worker = Arc::new(ScriptedWorker::new());
    let orch = Orchestrator::new(worker.clone(), Arc::new(MemoryCheckpointStore::new()));

    let mut config = OrchestrationConfig::new("par-serial");
    config.max_parallel_agents = 1;
    let outcome = orch.execute(OBJECTIVE, config, Some(team())).await;

    assert!(outcome.success);
    assert_eq!(worker.peak_in_flight(), 1);
    assert!(outcome.results.iter().all(|r| !r.metadata.parallel_execution));

    // High priority goes first.
    let order: Vec<String> = worker.calls().into_iter().map(|c| c.task_id).collect();
    assert_eq!(order[0], "task-1-researcher");
    assert_eq!(order.last().map(String::as_str), Some("task-4-reviewer"));
}

#[tokio::test]
async fn worker_only_sees_in_progress_tasks() {
    let worker = Arc::new(ScriptedWorker::new());
    let orch = Orchestrator::new(worker.clone(), Arc::new(MemoryCheckpointStore::new()));
    orch.execute(OBJECTIVE, OrchestrationConfig::new("par-status"), Some(team()))
        .await;

    let calls = worker.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.status == TaskStatus::InProgress));
}

#[tokio::test]
async fn one_failure_routes_whole_batch_to_error_handler() {
    let worker = ScriptedWorker::new()
        .fail("analyzer", WorkerError::Failed("schema mismatch".into()));
    let orch = Orchestrator::new(Arc::new(worker), Arc::new(MemoryCheckpointStore::new()));
    let outcome = orch
        .execute(OBJECTIVE, OrchestrationConfig::new("par-fail"), Some(team()))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.state.current_phase, Phase::Execution);
    assert_eq!(outcome.errors, vec!["schema mismatch".to_string()]);

    // Siblings in the failed batch still land as completed.
    let state = &outcome.state;
    assert_eq!(state.task("task-1-researcher").unwrap().status, TaskStatus::Completed);
    assert_eq!(state.task("task-2-analyzer").unwrap().status, TaskStatus::Failed);
    assert_eq!(state.task("task-4-reviewer").unwrap().status, TaskStatus::Pending);
    assert!(state.messages.last().unwrap().content.contains("Non-recoverable"));
}
