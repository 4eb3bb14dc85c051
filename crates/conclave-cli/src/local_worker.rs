//! Deterministic in-process worker for local runs.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::worker::{WorkerError, WorkerExecutor};
use conclave_core::{AgentResult, Message, Task};
use serde_json::json;

/// Answers every task with the same structured verdict so that a local
/// session reaches agreement. Agents listed as flaky fail their first
/// attempt with a recoverable error.
pub struct LocalWorker {
    latency: Duration,
    flaky: Mutex<HashSet<String>>,
}

impl LocalWorker {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            flaky: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_flaky<I, T>(self, agents: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        if let Ok(mut flaky) = self.flaky.lock() {
            flaky.extend(agents.into_iter().map(Into::into));
        }
        self
    }

    fn take_flaky(&self, agent_id: &str) -> bool {
        self.flaky
            .lock()
            .map(|mut flaky| flaky.remove(agent_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl WorkerExecutor for LocalWorker {
    async fn execute_task(
        &self,
        agent_id: &str,
        task: &Task,
        history: &[Message],
        session_id: &str,
    ) -> Result<AgentResult, WorkerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.take_flaky(agent_id) {
            return Err(WorkerError::Temporary(format!(
                "{agent_id} is warming up"
            )));
        }

        let objective = history
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or(task.description.as_str());
        tracing::debug!(session_id, agent_id, task_id = %task.task_id, "local worker answering");

        let mut result = AgentResult::new(
            agent_id,
            task.task_id.clone(),
            json!({ "objective": objective, "verdict": "done" }),
        )
        .with_confidence(0.8);
        result.reasoning = Some(format!("{agent_id} handled {}", task.task_id));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::TaskPriority;

    fn task() -> Task {
        Task::new("task-1-researcher", "researcher", "dig", TaskPriority::High)
    }

    #[tokio::test]
    async fn answers_are_identical_across_agents() {
        let worker = LocalWorker::new(Duration::ZERO);
        let history = vec![Message::user("Research trends")];

        let a = worker
            .execute_task("researcher", &task(), &history, "s")
            .await
            .unwrap();
        let b = worker
            .execute_task("analyzer", &task(), &history, "s")
            .await
            .unwrap();
        assert!(a.output.structurally_eq(&b.output));
        assert_eq!(a.output.as_value()["objective"], "Research trends");
        assert_eq!(a.confidence, Some(0.8));
    }

    #[tokio::test]
    async fn flaky_agent_fails_only_once() {
        let worker = LocalWorker::new(Duration::ZERO).with_flaky(["researcher"]);

        let first = worker
            .execute_task("researcher", &task(), &[], "s")
            .await
            .unwrap_err();
        assert!(first.to_string().starts_with("temporary_failure"));

        let second = worker.execute_task("researcher", &task(), &[], "s").await;
        assert!(second.is_ok());
    }
}
