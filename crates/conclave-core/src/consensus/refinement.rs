//! Collaborative refinement of the voting winner.

use crate::domain::result::{AgentResult, ResultOutput};

/// Results above this confidence contribute their reasoning.
pub const QUALITY_THRESHOLD: f64 = 0.8;

/// Attach the combined reasoning of high-confidence results to `winner`.
///
/// Only object outputs are extended, with `collaborativeReasoning` (the
/// contributing rationales joined one per line) and `contributors`. Any other
/// output, or a winner with no qualifying reasoning, comes back unchanged.
pub fn refine_result(winner: &ResultOutput, results: &[AgentResult]) -> ResultOutput {
    let contributing: Vec<&AgentResult> = results
        .iter()
        .filter(|r| !r.is_error())
        .filter(|r| r.confidence.is_some_and(|c| c > QUALITY_THRESHOLD))
        .filter(|r| r.reasoning.as_deref().is_some_and(|s| !s.trim().is_empty()))
        .collect();

    let ResultOutput::Structured(serde_json::Value::Object(fields)) = winner else {
        return winner.clone();
    };
    if contributing.is_empty() {
        return winner.clone();
    }

    let reasoning: Vec<&str> = contributing
        .iter()
        .filter_map(|r| r.reasoning.as_deref())
        .collect();
    let contributors: Vec<&str> = contributing.iter().map(|r| r.agent_id.as_str()).collect();

    let mut refined = fields.clone();
    refined.insert(
        "collaborativeReasoning".to_string(),
        serde_json::Value::String(reasoning.join("\n")),
    );
    refined.insert("contributors".to_string(), serde_json::json!(contributors));
    ResultOutput::Structured(serde_json::Value::Object(refined))
}
