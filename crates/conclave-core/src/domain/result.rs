//! Worker output for a single task.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence assumed when a result does not report one.
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Plain text or a structured JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl ResultOutput {
    pub fn text(s: impl Into<String>) -> Self {
        ResultOutput::Text(s.into())
    }

    /// JSON view of the output. Text becomes a JSON string.
    pub fn as_value(&self) -> serde_json::Value {
        match self {
            ResultOutput::Text(s) => serde_json::Value::String(s.clone()),
            ResultOutput::Structured(v) => v.clone(),
        }
    }

    /// Deterministic serialisation used for structural equality.
    ///
    /// Object keys come out sorted, so `{"a":1,"b":2}` and `{"b":2,"a":1}`
    /// share one canonical form; `Text("x")` equals `Structured("x")`.
    pub fn canonical(&self) -> String {
        self.as_value().to_string()
    }

    pub fn structurally_eq(&self, other: &ResultOutput) -> bool {
        self.as_value() == other.as_value()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultOutput::Text(s) => Some(s),
            ResultOutput::Structured(serde_json::Value::String(s)) => Some(s),
            ResultOutput::Structured(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResultOutput::Structured(serde_json::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResultOutput::Structured(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

impl From<&str> for ResultOutput {
    fn from(s: &str) -> Self {
        ResultOutput::Text(s.to_string())
    }
}

impl From<serde_json::Value> for ResultOutput {
    fn from(v: serde_json::Value) -> Self {
        ResultOutput::Structured(v)
    }
}

/// Execution bookkeeping attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Produced by a fan-out batch rather than single dispatch.
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One agent's output for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub task_id: String,
    pub output: ResultOutput,
    /// In `[0, 1]` when present.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl AgentResult {
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        output: impl Into<ResultOutput>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            output: output.into(),
            confidence: None,
            reasoning: None,
            error: None,
            metadata: ResultMetadata::default(),
        }
    }

    /// Result standing in for a failed or timed-out execution.
    pub fn failure(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            output: ResultOutput::Text(String::new()),
            error: Some(error),
            ..Self::new(agent_id, task_id, "")
        }
    }

    /// Clamped to `[0, 1]`; NaN is dropped.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self.normalize_confidence();
        self
    }

    /// Re-apply the confidence bounds to a result whose fields were set
    /// directly.
    pub fn normalize_confidence(&mut self) {
        self.confidence = self
            .confidence
            .filter(|c| !c.is_nan())
            .map(|c| c.clamp(0.0, 1.0));
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.agent_id, &self.task_id)
    }

    pub fn confidence_or_neutral(&self) -> f64 {
        self.confidence.unwrap_or(NEUTRAL_CONFIDENCE)
    }
}
