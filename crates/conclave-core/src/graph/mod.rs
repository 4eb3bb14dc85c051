//! Generic directed-graph executor.
//!
//! A [`StateGraph`] holds named nodes, each backed by a [`NodeHandler`] that
//! reads the current state and returns a patch. Edges are either direct or
//! conditional (a router picks one of a declared set of targets at runtime).
//! [`CompiledGraph::run`] drives the loop:
//!
//! 1. run the current node's handler
//! 2. merge the patch into the state via [`GraphState::apply`]
//! 3. pick the next node (router, direct edge, or [`END`])
//! 4. persist a checkpoint when a [`Checkpointer`] is attached
//!
//! The loop stops at [`END`], when the termination predicate holds, or when
//! the step budget runs out. Running out of steps is a soft stop: the run
//! returns the current state with [`StopReason::RecursionLimit`].
//!
//! The engine knows nothing about orchestration.

mod error;

pub use error::GraphError;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Terminal marker. Routing here ends the run.
pub const END: &str = "__end__";

/// State threaded through a graph.
pub trait GraphState: Clone + Send + Sync + 'static {
    type Patch: Send;

    /// Merge a node's patch into the state.
    fn apply(&mut self, patch: Self::Patch);

    /// Called before each checkpoint write; returns the checkpoint sequence.
    fn mark_checkpoint(&mut self) -> u64 {
        0
    }
}

/// A graph node.
#[async_trait]
pub trait NodeHandler<S: GraphState>: Send + Sync {
    async fn run(&self, state: &S) -> Result<S::Patch, GraphError>;
}

/// Adapter turning a synchronous closure into a [`NodeHandler`].
pub struct FnNode<F>(pub F);

#[async_trait]
impl<S, F> NodeHandler<S> for FnNode<F>
where
    S: GraphState,
    F: Fn(&S) -> Result<S::Patch, GraphError> + Send + Sync,
{
    async fn run(&self, state: &S) -> Result<S::Patch, GraphError> {
        (self.0)(state)
    }
}

/// Picks the next node name from the state.
pub type Router<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// Persists state snapshots between steps.
#[async_trait]
pub trait Checkpointer<S: GraphState>: Send + Sync {
    async fn save(
        &self,
        state: &S,
        next_node: Option<&str>,
        sequence: u64,
    ) -> Result<(), GraphError>;
}

enum Edge<S> {
    Direct(String),
    Conditional {
        targets: Vec<String>,
        router: Router<S>,
    },
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached [`END`] or the termination predicate held.
    Terminated,
    /// The step budget ran out.
    RecursionLimit,
}

/// Outcome of [`CompiledGraph::run`].
#[derive(Debug, Clone)]
pub struct GraphRun<S> {
    pub state: S,
    pub steps: usize,
    pub stop_reason: StopReason,
    pub last_node: Option<String>,
    /// Node that would have run next; set only on a soft stop.
    pub pending_node: Option<String>,
}

/// Per-run options.
pub struct RunOptions<'a, S: GraphState> {
    /// Node to start from; defaults to the entry point.
    pub start: Option<String>,
    pub max_steps: usize,
    pub checkpointer: Option<&'a dyn Checkpointer<S>>,
    /// Label attached to logs, usually the session id.
    pub run_label: String,
}

impl<'a, S: GraphState> RunOptions<'a, S> {
    pub fn new(run_label: impl Into<String>, max_steps: usize) -> Self {
        Self {
            start: None,
            max_steps,
            checkpointer: None,
            run_label: run_label.into(),
        }
    }

    pub fn starting_at(mut self, node: impl Into<String>) -> Self {
        self.start = Some(node.into());
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: &'a dyn Checkpointer<S>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }
}

/// Description of one node's outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub from: String,
    pub to: Vec<String>,
    pub conditional: bool,
}

/// Static shape of a graph, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStructure {
    pub entry_point: String,
    pub nodes: Vec<String>,
    pub edges: Vec<EdgeDescription>,
}

/// Mutable graph definition.
pub struct StateGraph<S: GraphState> {
    nodes: BTreeMap<String, Arc<dyn NodeHandler<S>>>,
    order: Vec<String>,
    edges: BTreeMap<String, Edge<S>>,
    entry: Option<String>,
    terminate_when: Option<Arc<dyn Fn(&S) -> bool + Send + Sync>>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            order: Vec::new(),
            edges: BTreeMap::new(),
            entry: None,
            terminate_when: None,
        }
    }

    pub fn add_node(
        &mut self,
        name: &str,
        handler: impl NodeHandler<S> + 'static,
    ) -> Result<&mut Self, GraphError> {
        if name == END || self.nodes.contains_key(name) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        self.nodes.insert(name.to_string(), Arc::new(handler));
        self.order.push(name.to_string());
        Ok(self)
    }

    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<&mut Self, GraphError> {
        self.insert_edge(from, Edge::Direct(to.to_string()))
    }

    /// Route from `from` through `router`, which must return one of `targets`.
    pub fn add_conditional_edges<F>(
        &mut self,
        from: &str,
        targets: &[&str],
        router: F,
    ) -> Result<&mut Self, GraphError>
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.insert_edge(
            from,
            Edge::Conditional {
                targets: targets.iter().map(|t| t.to_string()).collect(),
                router: Arc::new(router),
            },
        )
    }

    pub fn set_entry_point(&mut self, name: &str) -> &mut Self {
        self.entry = Some(name.to_string());
        self
    }

    /// Stop the run after any step where `predicate` holds.
    pub fn terminate_when<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.terminate_when = Some(Arc::new(predicate));
        self
    }

    fn insert_edge(&mut self, from: &str, edge: Edge<S>) -> Result<&mut Self, GraphError> {
        if self.edges.contains_key(from) {
            return Err(GraphError::DuplicateEdge {
                node: from.to_string(),
            });
        }
        self.edges.insert(from.to_string(), edge);
        Ok(self)
    }

    /// Validate every reference and freeze the graph.
    pub fn compile(self) -> Result<CompiledGraph<S>, GraphError> {
        let entry = self.entry.clone().ok_or(GraphError::MissingEntryPoint)?;
        let known = |name: &str| name == END || self.nodes.contains_key(name);

        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownNode(entry));
        }
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode(from.clone()));
            }
            let targets: Vec<&String> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { targets, .. } => targets.iter().collect(),
            };
            if let Some(missing) = targets.into_iter().find(|t| !known(t)) {
                return Err(GraphError::UnknownNode(missing.clone()));
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            order: self.order,
            edges: self.edges,
            entry,
            terminate_when: self.terminate_when,
        })
    }
}

/// Validated, immutable graph ready to run.
pub struct CompiledGraph<S: GraphState> {
    nodes: BTreeMap<String, Arc<dyn NodeHandler<S>>>,
    order: Vec<String>,
    edges: BTreeMap<String, Edge<S>>,
    entry: String,
    terminate_when: Option<Arc<dyn Fn(&S) -> bool + Send + Sync>>,
}

impl<S: GraphState> CompiledGraph<S> {
    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn structure(&self) -> GraphStructure {
        let edges = self
            .order
            .iter()
            .filter_map(|from| {
                self.edges.get(from).map(|edge| match edge {
                    Edge::Direct(to) => EdgeDescription {
                        from: from.clone(),
                        to: vec![to.clone()],
                        conditional: false,
                    },
                    Edge::Conditional { targets, .. } => EdgeDescription {
                        from: from.clone(),
                        to: targets.clone(),
                        conditional: true,
                    },
                })
            })
            .collect();

        GraphStructure {
            entry_point: self.entry.clone(),
            nodes: self.order.clone(),
            edges,
        }
    }

    /// Drive the graph from the entry point (or `options.start`).
    pub async fn run(
        &self,
        mut state: S,
        options: RunOptions<'_, S>,
    ) -> Result<GraphRun<S>, GraphError> {
        let mut current = options.start.clone().unwrap_or_else(|| self.entry.clone());
        let mut steps = 0usize;
        let mut last_node = None;

        loop {
            if current == END {
                return Ok(GraphRun {
                    state,
                    steps,
                    stop_reason: StopReason::Terminated,
                    last_node,
                    pending_node: None,
                });
            }
            if steps >= options.max_steps {
                warn!(
                    run = %options.run_label,
                    steps,
                    next = %current,
                    "step budget exhausted, stopping"
                );
                return Ok(GraphRun {
                    state,
                    steps,
                    stop_reason: StopReason::RecursionLimit,
                    last_node,
                    pending_node: Some(current),
                });
            }

            let handler = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode(current.clone()))?;

            let patch = handler.run(&state).await?;
            state.apply(patch);
            steps += 1;

            let next = self.next_node(&current, &state)?;
            crate::obs::emit_node_completed(&options.run_label, &current, steps, &next);

            if let Some(checkpointer) = options.checkpointer {
                let sequence = state.mark_checkpoint();
                let next_ref = (next != END).then_some(next.as_str());
                if let Err(e) = checkpointer.save(&state, next_ref, sequence).await {
                    crate::obs::emit_checkpoint_error(&options.run_label, sequence, &e);
                }
            }

            last_node = Some(std::mem::replace(&mut current, next));
        }
    }

    fn next_node(&self, from: &str, state: &S) -> Result<String, GraphError> {
        if let Some(predicate) = &self.terminate_when {
            if predicate(state) {
                debug!(node = from, "termination predicate holds");
                return Ok(END.to_string());
            }
        }

        match self.edges.get(from) {
            None => Ok(END.to_string()),
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional { targets, router }) => {
                let target = router(state);
                if target == END || targets.iter().any(|t| *t == target) {
                    Ok(target)
                } else {
                    Err(GraphError::UnknownRoute {
                        node: from.to_string(),
                        target,
                    })
                }
            }
        }
    }
}
