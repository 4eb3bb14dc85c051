//! The supervisor graph: orchestration nodes installed into the graph engine.
//!
//! ```text
//! planning -> supervisor -+-> parallel_execution -+-> synchronize -+-> consensus -> review
//!                ^        +-> agent_execution ----+                +-> review
//!                |        +-> review              +-> error_handler
//!                |                                                     review -> supervisor | END
//!                +------------------------------------ error_handler -> supervisor | END
//! ```

pub mod consensus_round;
pub mod execution;
pub mod planner;
pub mod recovery;
pub mod reviewer;
pub mod router;
pub mod synchronizer;

use std::sync::Arc;

use crate::consensus::ConflictClassifier;
use crate::domain::state::{Phase, SessionState};
use crate::events::EventPublisher;
use crate::graph::{CompiledGraph, GraphError, StateGraph, END};
use crate::worker::WorkerExecutor;

pub const PLANNING: &str = "planning";
pub const SUPERVISOR: &str = "supervisor";
pub const PARALLEL_EXECUTION: &str = "parallel_execution";
pub const AGENT_EXECUTION: &str = "agent_execution";
pub const SYNCHRONIZE: &str = "synchronize";
pub const CONSENSUS: &str = "consensus";
pub const REVIEW: &str = "review";
pub const ERROR_HANDLER: &str = "error_handler";

/// Collaborators shared by every node.
pub struct NodeContext {
    pub worker: Arc<dyn WorkerExecutor>,
    pub publisher: Arc<dyn EventPublisher>,
    pub classifier: Arc<dyn ConflictClassifier>,
}

/// Node to re-enter for a session persisted in `phase`.
pub fn entry_node_for(phase: Phase) -> Option<&'static str> {
    match phase {
        Phase::Planning => Some(PLANNING),
        Phase::Execution => Some(SUPERVISOR),
        Phase::Consensus => Some(CONSENSUS),
        Phase::Review => Some(REVIEW),
        Phase::Complete => None,
    }
}

/// Compile the supervisor graph.
pub fn build_supervisor_graph(
    ctx: Arc<NodeContext>,
) -> Result<CompiledGraph<SessionState>, GraphError> {
    let mut graph = StateGraph::new();

    graph
        .add_node(PLANNING, planner::PlanningNode::new(Arc::clone(&ctx)))?
        .add_node(SUPERVISOR, router::SupervisorNode)?
        .add_node(
            PARALLEL_EXECUTION,
            execution::ExecutionNode::parallel(Arc::clone(&ctx)),
        )?
        .add_node(AGENT_EXECUTION, execution::ExecutionNode::single(Arc::clone(&ctx)))?
        .add_node(SYNCHRONIZE, synchronizer::SynchronizeNode::new(Arc::clone(&ctx)))?
        .add_node(CONSENSUS, consensus_round::ConsensusNode::new(Arc::clone(&ctx)))?
        .add_node(REVIEW, reviewer::ReviewNode::new(Arc::clone(&ctx)))?
        .add_node(ERROR_HANDLER, recovery::ErrorHandlerNode::new(ctx))?;

    graph
        .add_edge(PLANNING, SUPERVISOR)?
        .add_conditional_edges(
            SUPERVISOR,
            &[PARALLEL_EXECUTION, AGENT_EXECUTION, REVIEW],
            router::route_from_supervisor,
        )?
        .add_conditional_edges(
            PARALLEL_EXECUTION,
            &[SYNCHRONIZE, ERROR_HANDLER],
            execution::route_after_execution,
        )?
        .add_conditional_edges(
            AGENT_EXECUTION,
            &[SYNCHRONIZE, ERROR_HANDLER],
            execution::route_after_execution,
        )?
        .add_conditional_edges(
            SYNCHRONIZE,
            &[CONSENSUS, REVIEW],
            synchronizer::route_after_synchronize,
        )?
        .add_edge(CONSENSUS, REVIEW)?
        .add_conditional_edges(REVIEW, &[SUPERVISOR, END], reviewer::route_after_review)?
        .add_conditional_edges(
            ERROR_HANDLER,
            &[SUPERVISOR, END],
            recovery::route_after_error,
        )?;

    graph
        .set_entry_point(PLANNING)
        .terminate_when(|state: &SessionState| state.current_phase == Phase::Complete);

    graph.compile()
}
