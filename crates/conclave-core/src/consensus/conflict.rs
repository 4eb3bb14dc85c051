//! Pairwise conflict detection and resolution.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::agent::DEFAULT_AGENT_PRIORITY;
use crate::domain::result::{AgentResult, ResultOutput};

/// Confidence gap above which two differing outputs count as divergent.
pub const DIVERGENCE_GAP: f64 = 0.5;

pub const DEFAULT_POSITIVE_PATTERN: &str = r"(?i)\b(accept|approv|agree|support|confirm)\w*";
pub const DEFAULT_NEGATIVE_PATTERN: &str =
    r"(?i)\b(reject|deny|denied|disagree|oppos|refus|declin)\w*";

static POSITIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(DEFAULT_POSITIVE_PATTERN).ok());
static NEGATIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(DEFAULT_NEGATIVE_PATTERN).ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Contradiction,
    Divergence,
    None,
}

/// Decides whether two outputs contradict each other.
pub trait ConflictClassifier: Send + Sync {
    fn classify_conflict(&self, a: &ResultOutput, b: &ResultOutput) -> ConflictKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
    Neutral,
}

/// Flags differing booleans and text with opposing sentiment keywords.
#[derive(Debug, Clone)]
pub struct KeywordConflictClassifier {
    positive: Option<Regex>,
    negative: Option<Regex>,
}

impl Default for KeywordConflictClassifier {
    fn default() -> Self {
        Self {
            positive: POSITIVE.clone(),
            negative: NEGATIVE.clone(),
        }
    }
}

impl KeywordConflictClassifier {
    /// Classifier with custom positive and negative patterns.
    pub fn with_patterns(positive: &str, negative: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            positive: Some(Regex::new(positive)?),
            negative: Some(Regex::new(negative)?),
        })
    }

    fn polarity(&self, text: &str) -> Polarity {
        let matches = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(text));
        match (matches(&self.positive), matches(&self.negative)) {
            (true, false) => Polarity::Positive,
            (false, true) => Polarity::Negative,
            _ => Polarity::Neutral,
        }
    }
}

impl ConflictClassifier for KeywordConflictClassifier {
    fn classify_conflict(&self, a: &ResultOutput, b: &ResultOutput) -> ConflictKind {
        if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
            return if x != y {
                ConflictKind::Contradiction
            } else {
                ConflictKind::None
            };
        }
        if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
            let (px, py) = (self.polarity(x), self.polarity(y));
            if matches!(
                (px, py),
                (Polarity::Positive, Polarity::Negative) | (Polarity::Negative, Polarity::Positive)
            ) {
                return ConflictKind::Contradiction;
            }
        }
        ConflictKind::None
    }
}

/// A flagged disagreement between two results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub first: ResultRef,
    pub second: ResultRef,
    pub detail: String,
    /// Confidence gap, for divergences.
    #[serde(default)]
    pub magnitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRef {
    pub agent_id: String,
    pub task_id: String,
    pub output: ResultOutput,
    pub confidence: Option<f64>,
}

impl From<&AgentResult> for ResultRef {
    fn from(r: &AgentResult) -> Self {
        Self {
            agent_id: r.agent_id.clone(),
            task_id: r.task_id.clone(),
            output: r.output.clone(),
            confidence: r.confidence,
        }
    }
}

/// Compare two results. Contradiction wins over divergence.
pub fn detect_conflict(
    a: &AgentResult,
    b: &AgentResult,
    classifier: &dyn ConflictClassifier,
) -> Option<Conflict> {
    if a.is_error() || b.is_error() {
        return None;
    }

    let classified = classifier.classify_conflict(&a.output, &b.output);
    if classified == ConflictKind::Contradiction {
        return Some(Conflict {
            kind: ConflictKind::Contradiction,
            first: a.into(),
            second: b.into(),
            detail: format!(
                "{} and {} reached opposing conclusions",
                a.agent_id, b.agent_id
            ),
            magnitude: None,
        });
    }

    let differ = !a.output.structurally_eq(&b.output);
    if let (Some(ca), Some(cb)) = (a.confidence, b.confidence) {
        let gap = (ca - cb).abs();
        if differ && gap > DIVERGENCE_GAP {
            return Some(Conflict {
                kind: ConflictKind::Divergence,
                first: a.into(),
                second: b.into(),
                detail: format!("confidence gap of {gap:.2} between differing outputs"),
                magnitude: Some(gap),
            });
        }
    }

    if classified == ConflictKind::Divergence {
        return Some(Conflict {
            kind: ConflictKind::Divergence,
            first: a.into(),
            second: b.into(),
            detail: format!("{} and {} diverge", a.agent_id, b.agent_id),
            magnitude: None,
        });
    }
    None
}

/// Every unordered pair, in input order.
pub fn detect_conflicts(
    results: &[AgentResult],
    classifier: &dyn ConflictClassifier,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, a) in results.iter().enumerate() {
        for b in &results[i + 1..] {
            if let Some(conflict) = detect_conflict(a, b, classifier) {
                conflicts.push(conflict);
            }
        }
    }
    conflicts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    PriorityBased,
    Averaging,
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub method: ResolutionMethod,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub resolved_output: Option<ResultOutput>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub description: String,
}

/// Resolve a conflict. `priority_of` looks up an agent's registered priority.
pub fn resolve_conflict(
    conflict: &Conflict,
    priority_of: impl Fn(&str) -> Option<u8>,
) -> Resolution {
    match conflict.kind {
        ConflictKind::Divergence => resolve_by_averaging(conflict),
        _ => resolve_by_priority(conflict, priority_of),
    }
}

fn resolve_by_priority(
    conflict: &Conflict,
    priority_of: impl Fn(&str) -> Option<u8>,
) -> Resolution {
    let (a, b) = (&conflict.first, &conflict.second);
    let (pa, pb) = (priority_of(&a.agent_id), priority_of(&b.agent_id));

    if pa.is_none() && pb.is_none() {
        return Resolution {
            method: ResolutionMethod::Escalation,
            winner: None,
            resolved_output: None,
            confidence: None,
            description: format!(
                "Cannot rank {} against {}: no registered priority. Human intervention recommended.",
                a.agent_id, b.agent_id
            ),
        };
    }

    let pa = pa.unwrap_or(DEFAULT_AGENT_PRIORITY);
    let pb = pb.unwrap_or(DEFAULT_AGENT_PRIORITY);
    let a_wins = pa > pb
        || (pa == pb && a.confidence.unwrap_or(0.0) >= b.confidence.unwrap_or(0.0));
    let (winner, loser, wp, lp) = if a_wins { (a, b, pa, pb) } else { (b, a, pb, pa) };

    Resolution {
        method: ResolutionMethod::PriorityBased,
        winner: Some(winner.agent_id.clone()),
        resolved_output: Some(winner.output.clone()),
        confidence: winner.confidence,
        description: format!(
            "Resolved in favour of {} (priority {wp}) over {} (priority {lp})",
            winner.agent_id, loser.agent_id
        ),
    }
}

fn resolve_by_averaging(conflict: &Conflict) -> Resolution {
    let (a, b) = (&conflict.first, &conflict.second);
    let ca = a.confidence.unwrap_or(0.0);
    let cb = b.confidence.unwrap_or(0.0);
    let total = ca + cb;
    let confidence = if total > 0.0 { (ca * ca + cb * cb) / total } else { 0.0 };

    let resolved_output = match (a.output.as_f64(), b.output.as_f64()) {
        (Some(x), Some(y)) if total > 0.0 => {
            ResultOutput::Structured(serde_json::json!((x * ca + y * cb) / total))
        }
        _ if cb > ca => b.output.clone(),
        _ => a.output.clone(),
    };

    Resolution {
        method: ResolutionMethod::Averaging,
        winner: None,
        resolved_output: Some(resolved_output),
        confidence: Some(confidence),
        description: format!(
            "Weighted average of outputs from {} ({ca:.2}) and {} ({cb:.2})",
            a.agent_id, b.agent_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(agent: &str, output: impl Into<ResultOutput>, confidence: Option<f64>) -> AgentResult {
        let result = AgentResult::new(agent, "t1", output);
        match confidence {
            Some(c) => result.with_confidence(c),
            None => result,
        }
    }

    #[test]
    fn test_default_patterns_are_loaded() {
        let classifier = KeywordConflictClassifier::default();
        assert!(classifier.positive.is_some());
        assert!(classifier.negative.is_some());
        assert!(
            KeywordConflictClassifier::with_patterns(DEFAULT_POSITIVE_PATTERN, DEFAULT_NEGATIVE_PATTERN)
                .is_ok()
        );
        assert!(KeywordConflictClassifier::with_patterns("(", "x").is_err());
    }

    fn keyword() -> KeywordConflictClassifier {
        KeywordConflictClassifier::default()
    }

    #[test]
    fn test_opposing_keywords_contradict() {
        let c = detect_conflict(
            &r("a1", "I approve this plan", None),
            &r("a2", "We must reject it", None),
            &keyword(),
        )
        .unwrap();
        assert_eq!(c.kind, ConflictKind::Contradiction);
    }

    #[test]
    fn test_disagree_is_not_read_as_agree() {
        let k = keyword();
        assert_eq!(
            k.classify_conflict(&"I disagree".into(), &"I also disagree".into()),
            ConflictKind::None
        );
        assert_eq!(
            k.classify_conflict(&"I agree".into(), &"I disagree".into()),
            ConflictKind::Contradiction
        );
    }

    #[test]
    fn test_differing_booleans_contradict() {
        let yes = r("a1", json!(true), None);
        let no = r("a2", json!(false), None);
        let also_yes = r("a3", json!(true), None);
        let c = detect_conflict(&yes, &no, &keyword());
        assert_eq!(c.unwrap().kind, ConflictKind::Contradiction);
        assert!(detect_conflict(&yes, &also_yes, &keyword()).is_none());
    }

    #[test]
    fn test_large_confidence_gap_diverges() {
        let c = detect_conflict(
            &r("a1", "alpha", Some(0.95)),
            &r("a2", "beta", Some(0.3)),
            &keyword(),
        )
        .unwrap();
        assert_eq!(c.kind, ConflictKind::Divergence);
        assert!(c.detail.contains("0.65"));
    }

    #[test]
    fn test_identical_outputs_never_conflict() {
        let results = vec![
            r("a1", "same", Some(0.9)),
            r("a2", "same", Some(0.5)),
            r("a3", "same", Some(0.1)),
        ];
        assert!(detect_conflicts(&results, &keyword()).is_empty());
    }

    #[test]
    fn test_small_gap_does_not_diverge() {
        let a = r("a1", "x", Some(0.8));
        let b = r("a2", "y", Some(0.5));
        assert!(detect_conflict(&a, &b, &keyword()).is_none());
    }

    #[test]
    fn test_priority_resolution_names_winner() {
        let a = r("a1", "accept", None);
        let b = r("a2", "reject", None);
        let c = detect_conflict(&a, &b, &keyword()).unwrap();
        let res = resolve_conflict(&c, |id| match id {
            "a1" => Some(3),
            "a2" => Some(9),
            _ => None,
        });
        assert_eq!(res.method, ResolutionMethod::PriorityBased);
        assert_eq!(res.winner.as_deref(), Some("a2"));
        assert!(res.description.contains("a2"));
    }

    #[test]
    fn test_unknown_priorities_escalate() {
        let c = detect_conflict(&r("x", "accept", None), &r("y", "deny", None), &keyword()).unwrap();
        let res = resolve_conflict(&c, |_| None);
        assert_eq!(res.method, ResolutionMethod::Escalation);
        assert!(res.description.contains("Human intervention"));
    }

    #[test]
    fn test_divergence_averages_numbers() {
        let high = r("a1", json!(10.0), Some(0.9));
        let low = r("a2", json!(0.0), Some(0.1));
        let c = detect_conflict(&high, &low, &keyword()).unwrap();
        let res = resolve_conflict(&c, |_| None);
        assert_eq!(res.method, ResolutionMethod::Averaging);
        assert!(res.description.to_lowercase().contains("weighted average"));
        let value = res.resolved_output.unwrap().as_f64().unwrap();
        assert!((value - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_patterns() {
        let k = KeywordConflictClassifier::with_patterns(r"(?i)\bgo\b", r"(?i)\bstop\b").unwrap();
        assert_eq!(
            k.classify_conflict(&"go".into(), &"stop".into()),
            ConflictKind::Contradiction
        );
        assert!(KeywordConflictClassifier::with_patterns("(", "x").is_err());
    }
}
