//! Test doubles for the external collaborators (testing only).
//!
//! [`ScriptedWorker`] replays a per-agent queue of canned replies, failures,
//! and delays, and records what it was asked to do. [`FailingPublisher`]
//! rejects every event.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::result::{AgentResult, ResultOutput};
use crate::domain::state::Message;
use crate::domain::task::{Task, TaskStatus};
use crate::events::{EventPublisher, PublishError};
use crate::worker::{WorkerError, WorkerExecutor};

/// One scripted response.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Option<Duration>,
    pub outcome: Result<Reply, WorkerError>,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub output: ResultOutput,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
}

/// A call the worker received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub agent_id: String,
    pub task_id: String,
    pub status: TaskStatus,
}

/// Worker that answers from per-agent scripts.
///
/// Agents without a queued step get `"<agent> completed <task>"` with no
/// confidence.
#[derive(Debug, Default)]
pub struct ScriptedWorker {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, agent_id: &str, step: Step) -> Self {
        lock(&self.scripts)
            .entry(agent_id.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn reply(
        self,
        agent_id: &str,
        output: impl Into<ResultOutput>,
        confidence: Option<f64>,
    ) -> Self {
        self.push(
            agent_id,
            Step {
                delay: None,
                outcome: Ok(Reply {
                    output: output.into(),
                    confidence,
                    reasoning: None,
                }),
            },
        )
    }

    pub fn reply_with_reasoning(
        self,
        agent_id: &str,
        output: impl Into<ResultOutput>,
        confidence: f64,
        reasoning: &str,
    ) -> Self {
        self.push(
            agent_id,
            Step {
                delay: None,
                outcome: Ok(Reply {
                    output: output.into(),
                    confidence: Some(confidence),
                    reasoning: Some(reasoning.to_string()),
                }),
            },
        )
    }

    pub fn fail(self, agent_id: &str, error: WorkerError) -> Self {
        self.push(
            agent_id,
            Step {
                delay: None,
                outcome: Err(error),
            },
        )
    }

    /// Reply after sleeping for `delay`.
    pub fn slow(self, agent_id: &str, delay: Duration, output: impl Into<ResultOutput>) -> Self {
        self.push(
            agent_id,
            Step {
                delay: Some(delay),
                outcome: Ok(Reply {
                    output: output.into(),
                    confidence: None,
                    reasoning: None,
                }),
            },
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, agent_id: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.agent_id == agent_id)
            .count()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self, agent_id: &str) -> Option<Step> {
        lock(&self.scripts)
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl WorkerExecutor for ScriptedWorker {
    async fn execute_task(
        &self,
        agent_id: &str,
        task: &Task,
        _history: &[Message],
        _session_id: &str,
    ) -> Result<AgentResult, WorkerError> {
        lock(&self.calls).push(Call {
            agent_id: agent_id.to_string(),
            task_id: task.task_id.clone(),
            status: task.status,
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = self.next_step(agent_id);
        if let Some(delay) = step.as_ref().and_then(|s| s.delay) {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = match step {
            Some(step) => step.outcome?,
            None => Reply {
                output: ResultOutput::Text(format!("{agent_id} completed {}", task.task_id)),
                confidence: None,
                reasoning: None,
            },
        };

        let mut result = AgentResult::new(agent_id, task.task_id.clone(), reply.output);
        if let Some(confidence) = reply.confidence {
            result = result.with_confidence(confidence);
        }
        if let Some(reasoning) = reply.reasoning {
            result = result.with_reasoning(reasoning);
        }
        Ok(result)
    }
}

/// Publisher that rejects every event.
#[derive(Debug, Default)]
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(
        &self,
        _session_id: &str,
        _event_type: &str,
        _payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        Err(PublishError::Unavailable("publisher offline".to_string()))
    }
}
