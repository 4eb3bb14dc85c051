//! Weighted agreement score in `[0, 100]`.

use crate::domain::agent::DEFAULT_AGENT_PRIORITY;
use crate::domain::result::AgentResult;

/// How much the results concur, weighting each by `priority × confidence`.
///
/// Every unordered pair contributes `w_i × w_j` when the two outputs are
/// structurally equal. The sum is normalised by the total pair weight, so the
/// score is the weighted share of agreeing pairs. No results scores 0, a
/// single result scores 100.
pub fn calculate_weighted_agreement(
    results: &[AgentResult],
    priority_of: impl Fn(&str) -> Option<u8>,
) -> f64 {
    match results.len() {
        0 => return 0.0,
        1 => return 100.0,
        _ => {}
    }

    let weights: Vec<f64> = results
        .iter()
        .map(|r| {
            let priority = priority_of(&r.agent_id).unwrap_or(DEFAULT_AGENT_PRIORITY);
            f64::from(priority) * r.confidence_or_neutral()
        })
        .collect();

    let mut agreeing = 0.0;
    let mut total = 0.0;
    let mut agreeing_pairs = 0usize;
    let mut pairs = 0usize;
    for i in 0..results.len() {
        for j in (i + 1)..results.len() {
            let pair_weight = weights[i] * weights[j];
            let equal = results[i].output.structurally_eq(&results[j].output);
            total += pair_weight;
            pairs += 1;
            if equal {
                agreeing += pair_weight;
                agreeing_pairs += 1;
            }
        }
    }

    // All weights zero: fall back to the plain share of agreeing pairs.
    let score = if total > 0.0 {
        agreeing / total * 100.0
    } else {
        agreeing_pairs as f64 / pairs as f64 * 100.0
    };
    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(agent: &str, output: &str, confidence: f64) -> AgentResult {
        AgentResult::new(agent, "t", output).with_confidence(confidence)
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(calculate_weighted_agreement(&[], |_| None), 0.0);
        assert_eq!(
            calculate_weighted_agreement(&[r("a", "x", 0.2)], |_| None),
            100.0
        );
    }

    #[test]
    fn test_full_agreement_is_100() {
        let results = vec![r("a", "x", 0.9), r("b", "x", 0.4), r("c", "x", 0.7)];
        assert!((calculate_weighted_agreement(&results, |_| Some(7)) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_disagreement_is_0() {
        let results = vec![r("a", "x", 0.9), r("b", "y", 0.9)];
        assert_eq!(calculate_weighted_agreement(&results, |_| None), 0.0);
    }

    #[test]
    fn test_heavier_agreeing_pair_raises_score() {
        let results = vec![r("a", "x", 0.9), r("b", "x", 0.9), r("c", "y", 0.9)];
        let even = calculate_weighted_agreement(&results, |_| Some(5));
        let boosted = calculate_weighted_agreement(&results, |id| match id {
            "c" => Some(1),
            _ => Some(10),
        });
        assert!((even - 100.0 / 3.0).abs() < 1e-9);
        assert!(boosted > even);
        assert!(boosted <= 100.0);
    }

    #[test]
    fn test_zero_weights_fall_back_to_pair_share() {
        let results = vec![r("a", "x", 0.0), r("b", "x", 0.0), r("c", "y", 0.0)];
        let score = calculate_weighted_agreement(&results, |_| None);
        assert!((score - 100.0 / 3.0).abs() < 1e-9);
    }
}
