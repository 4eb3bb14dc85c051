//! Graph engine errors.

/// Errors raised while building or driving a [`super::StateGraph`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("graph has no entry point")]
    MissingEntryPoint,

    #[error("node {node} already has outgoing edges")]
    DuplicateEdge { node: String },

    #[error("router for {node} chose undeclared target {target}")]
    UnknownRoute { node: String, target: String },

    #[error("node {node} failed: {reason}")]
    NodeFailed { node: String, reason: String },

    #[error("checkpoint write failed: {0}")]
    Checkpoint(String),
}

impl GraphError {
    pub fn node_failed(node: &str, reason: impl std::fmt::Display) -> Self {
        Self::NodeFailed {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}
