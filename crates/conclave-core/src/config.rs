//! Orchestration settings.

use serde::{Deserialize, Serialize};

use crate::domain::error::{OrchestrationError, Result};

pub const DEFAULT_MAX_RECURSION: usize = 50;
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_PARALLEL_AGENTS: usize = 3;
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-session orchestration configuration.
///
/// Every field except `session_id` has a default, so a TOML file only needs
/// the keys it changes:
///
/// ```toml
/// session_id = "quarterly-report"
/// consensus_required = true
/// max_parallel_agents = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub session_id: String,
    pub user_id: Option<String>,
    /// Step budget for one graph run.
    pub max_recursion: usize,
    pub consensus_required: bool,
    /// Fraction in `[0, 1]`; compared against the agreement score / 100.
    pub consensus_threshold: f64,
    pub max_parallel_agents: usize,
    pub agent_timeout_ms: u64,
    /// Budget for a whole `execute` or `resume` call.
    pub timeout_ms: Option<u64>,
    pub max_retries: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            user_id: None,
            max_recursion: DEFAULT_MAX_RECURSION,
            consensus_required: false,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            max_parallel_agents: DEFAULT_MAX_PARALLEL_AGENTS,
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            timeout_ms: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl OrchestrationConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(invalid("session_id is required"));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(invalid(format!(
                "consensus_threshold must be within [0, 1], got {}",
                self.consensus_threshold
            )));
        }
        if self.max_parallel_agents == 0 {
            return Err(invalid("max_parallel_agents must be at least 1"));
        }
        if self.max_recursion == 0 {
            return Err(invalid("max_recursion must be at least 1"));
        }
        if self.agent_timeout_ms == 0 {
            return Err(invalid("agent_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> OrchestrationError {
    OrchestrationError::InvalidConfig(msg.into())
}

/// Caller-supplied changes applied to a session before it is resumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeOverrides {
    pub max_recursion: Option<usize>,
    pub consensus_required: Option<bool>,
    pub consensus_threshold: Option<f64>,
    pub max_parallel_agents: Option<usize>,
    pub agent_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
}
