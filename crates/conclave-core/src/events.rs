//! Best-effort session event publishing.
//!
//! Nodes announce transitions through an [`EventPublisher`]. Publishing never
//! blocks orchestration: each call is bounded by [`PUBLISH_TIMEOUT`] and any
//! failure is logged at `warn` and dropped.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

pub const SESSION_STARTED: &str = "session.started";
pub const TASKS_PLANNED: &str = "tasks.planned";
pub const TASK_DISPATCHED: &str = "task.dispatched";
pub const TASK_FINISHED: &str = "task.finished";
pub const CONSENSUS_BUILT: &str = "consensus.built";
pub const REVIEW_APPROVED: &str = "review.approved";
pub const REVIEW_REJECTED: &str = "review.rejected";
pub const ERROR_HANDLED: &str = "error.handled";
pub const SESSION_FINISHED: &str = "session.finished";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("publisher unavailable: {0}")]
    Unavailable(String),

    #[error("publish timed out after {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        session_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError>;
}

/// Publish and swallow the outcome.
pub async fn publish_best_effort(
    publisher: &dyn EventPublisher,
    session_id: &str,
    event_type: &str,
    payload: serde_json::Value,
) {
    let outcome = tokio::time::timeout(
        PUBLISH_TIMEOUT,
        publisher.publish(session_id, event_type, payload),
    )
    .await
    .unwrap_or_else(|_| Err(PublishError::Timeout(PUBLISH_TIMEOUT.as_millis() as u64)));

    if let Err(e) = outcome {
        warn!(
            event = "publish.failed",
            session_id = %session_id,
            event_type = %event_type,
            error = %e,
        );
    }
}

/// Default publisher: writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(
        &self,
        session_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        info!(
            event = "session.event",
            session_id = %session_id,
            event_type = %event_type,
            payload = %payload,
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub session_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        session_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), PublishError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| PublishError::Unavailable("recorder lock poisoned".to_string()))?;
        events.push(PublishedEvent {
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            published_at: Utc::now(),
        });
        Ok(())
    }
}
