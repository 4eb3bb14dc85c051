//! Structured session lifecycle events.
//!
//! Every helper logs with a stable `event = "..."` field so log pipelines can
//! filter on it. Use `RUST_LOG=conclave_core=info` to see them.

use tracing::info;

/// Span covering one `execute` or `resume` call.
///
/// Attach it with [`tracing::Instrument::instrument`]; holding an entered
/// guard across `.await` would make the future `!Send`.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("conclave.session", session_id = %session_id)
}

pub fn emit_session_started(session_id: &str, objective: &str, agents: usize) {
    info!(
        event = "session.started",
        session_id = %session_id,
        objective = %objective,
        agents = agents,
    );
}

/// A graph node finished; `next` is the node chosen by routing.
pub fn emit_node_completed(session_id: &str, node: &str, step: usize, next: &str) {
    info!(
        event = "node.completed",
        session_id = %session_id,
        node = %node,
        step = step,
        next = %next,
    );
}

pub fn emit_session_finished(session_id: &str, duration_ms: u64, steps: usize, success: bool) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        duration_ms = duration_ms,
        steps = steps,
        success = success,
    );
}

/// Checkpoint write failed; the step still counts.
pub fn emit_checkpoint_error(session_id: &str, sequence: u64, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "checkpoint.write_failed",
        session_id = %session_id,
        sequence = sequence,
        error = %error,
    );
}
