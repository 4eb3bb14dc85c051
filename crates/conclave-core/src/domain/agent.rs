//! Worker descriptors and the agent catalog.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{OrchestrationError, Result};

/// Priority assumed for agents that are not in the catalog.
pub const DEFAULT_AGENT_PRIORITY: u8 = 5;

/// Specialist roles the planner and coordination protocol know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgentRole {
    Researcher,
    Analyzer,
    Writer,
    Reviewer,
    Coordinator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Researcher,
        AgentRole::Analyzer,
        AgentRole::Writer,
        AgentRole::Reviewer,
        AgentRole::Coordinator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Researcher => "researcher",
            AgentRole::Analyzer => "analyzer",
            AgentRole::Writer => "writer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "researcher" => Ok(AgentRole::Researcher),
            "analyzer" | "analyst" => Ok(AgentRole::Analyzer),
            "writer" => Ok(AgentRole::Writer),
            "reviewer" => Ok(AgentRole::Reviewer),
            "coordinator" | "supervisor" => Ok(AgentRole::Coordinator),
            other => Err(OrchestrationError::UnknownAgentRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for AgentRole {
    type Error = OrchestrationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AgentRole> for String {
    fn from(role: AgentRole) -> Self {
        role.as_str().to_string()
    }
}

/// Availability of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Available,
    Busy,
    Offline,
}

/// A registered worker. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: BTreeSet<String>,
    /// Higher is more authoritative (0-10).
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub status: AgentStatus,
}

fn default_priority() -> u8 {
    DEFAULT_AGENT_PRIORITY
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            description: String::new(),
            tools: BTreeSet::new(),
            priority: DEFAULT_AGENT_PRIORITY,
            capabilities: None,
            status: AgentStatus::Available,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tools<I, T>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities<I, T>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_available(&self) -> bool {
        self.status != AgentStatus::Offline
    }
}

/// Ordered set of agents keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentCatalog {
    agents: Vec<Agent>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog, rejecting duplicate ids and blank fields.
    pub fn from_agents(agents: Vec<Agent>) -> Result<Self> {
        let mut catalog = Self::new();
        for agent in agents {
            catalog.add(agent)?;
        }
        Ok(catalog)
    }

    /// The stock specialist team.
    pub fn default_specialists() -> Self {
        Self {
            agents: vec![
                Agent::new("researcher", "Research Specialist", AgentRole::Researcher)
                    .with_description("Gathers sources and facts relevant to the objective")
                    .with_tools(["web-search", "document-reader"])
                    .with_priority(8),
                Agent::new("analyzer", "Data Analyst", AgentRole::Analyzer)
                    .with_description("Evaluates evidence and extracts findings")
                    .with_tools(["calculator", "statistics"])
                    .with_priority(7),
                Agent::new("writer", "Report Writer", AgentRole::Writer)
                    .with_description("Drafts reports and summaries")
                    .with_tools(["editor"])
                    .with_priority(6),
                Agent::new("reviewer", "Quality Reviewer", AgentRole::Reviewer)
                    .with_description("Checks accuracy and completeness of the work")
                    .with_tools(["checklist"])
                    .with_priority(9),
            ],
        }
    }

    pub fn add(&mut self, agent: Agent) -> Result<()> {
        if agent.id.trim().is_empty() {
            return Err(OrchestrationError::InvalidConfig(
                "agent id must not be empty".to_string(),
            ));
        }
        if self.get(&agent.id).is_some() {
            return Err(OrchestrationError::DuplicateAgent(agent.id));
        }
        self.agents.push(agent);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Agent> {
        let index = self.agents.iter().position(|a| a.id == id)?;
        Some(self.agents.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// First available agent with `role`, in registration order.
    pub fn find_by_role(&self, role: AgentRole) -> Option<&Agent> {
        self.agents
            .iter()
            .find(|a| a.role == role && a.is_available())
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn into_agents(self) -> Vec<Agent> {
        self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
