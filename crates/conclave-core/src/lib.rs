//! Conclave Core Library
//!
//! A supervisor orchestration engine for teams of specialist agents: plan an
//! objective into tasks, dispatch them in bounded parallel, reconcile the
//! results through voting and conflict resolution, and checkpoint every step
//! so a session can be resumed.

pub mod config;
pub mod consensus;
pub mod coordination;
pub mod domain;
pub mod events;
pub mod fakes;
pub mod graph;
pub mod metrics;
pub mod obs;
pub mod service;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

pub use config::{OrchestrationConfig, ResumeOverrides};

pub use consensus::{
    build_consensus, calculate_weighted_agreement, detect_conflicts, resolve_conflict, vote,
    ConflictClassifier, ConflictKind, ConsensusReport, ConsensusStrategy,
    KeywordConflictClassifier, VotingMethod, VotingOutcome,
};

pub use coordination::{
    apply_coordination_protocols, determine_coordination_strategy, CoordinationPlan,
    CoordinationStrategy,
};

pub use domain::{
    Agent, AgentCatalog, AgentResult, AgentRole, AgentStatus, ErrorRecord, Message,
    OrchestrationError, Phase, Result, ResultOutput, SessionPatch, SessionState, Task,
    TaskPriority, TaskStatus,
};

pub use events::{EventPublisher, PublishError, RecordingPublisher, TracingPublisher};

pub use graph::{CompiledGraph, GraphError, GraphState, GraphStructure, StateGraph, StopReason};

pub use service::{ExecutionOutcome, Orchestrator, SessionStatus};

pub use supervisor::planner::Feasibility;

pub use worker::{WorkerError, WorkerExecutor};
