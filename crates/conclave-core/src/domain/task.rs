//! Units of work and their lifecycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{OrchestrationError, Result};

/// Task urgency. Lower rank is dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        })
    }
}

/// Lifecycle: `Pending -> InProgress -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_move_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    /// Empty while unassigned.
    #[serde(default)]
    pub agent_id: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Root task id when this task re-queues a failed one.
    #[serde(default)]
    pub retry_of: Option<String>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        description: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            dependencies: BTreeSet::new(),
            started_at: None,
            completed_at: None,
            context: serde_json::Map::new(),
            retry_of: None,
        }
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// The id of the first attempt of this unit of work.
    pub fn root_id(&self) -> &str {
        self.retry_of.as_deref().unwrap_or(&self.task_id)
    }

    /// Fresh pending copy of this task for another attempt.
    pub fn requeue(&self, attempt: u32) -> Task {
        let root = self.root_id().to_string();
        Task {
            task_id: format!("{root}#retry{attempt}"),
            agent_id: self.agent_id.clone(),
            description: self.description.clone(),
            priority: self.priority,
            status: TaskStatus::Pending,
            dependencies: self.dependencies.clone(),
            started_at: None,
            completed_at: None,
            context: self.context.clone(),
            retry_of: Some(root),
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::InProgress)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(OrchestrationError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Dependencies that have not completed, either directly or via a retry.
    pub fn unmet_dependencies(&self, tasks: &[Task]) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| {
                !tasks
                    .iter()
                    .any(|t| t.root_id() == dep.as_str() && t.status == TaskStatus::Completed)
            })
            .cloned()
            .collect()
    }

    pub fn dependencies_met(&self, tasks: &[Task]) -> bool {
        self.unmet_dependencies(tasks).is_empty()
    }

    /// Fails when the task may not enter in-progress yet.
    pub fn ensure_ready(&self, tasks: &[Task]) -> Result<()> {
        let unmet = self.unmet_dependencies(tasks);
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(OrchestrationError::UnmetDependencies {
                task_id: self.task_id.clone(),
                unmet,
            })
        }
    }

    /// A pending task is blocked when some dependency can no longer complete:
    /// every attempt of it failed, or it never existed.
    pub fn is_blocked(&self, tasks: &[Task]) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().any(|dep| {
                !tasks
                    .iter()
                    .any(|t| t.root_id() == dep.as_str() && t.status != TaskStatus::Failed)
            })
    }
}
