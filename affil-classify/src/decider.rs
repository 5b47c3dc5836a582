//! Attribution Decider
//!
//! Fixed precedence over the score triple:
//! 1. A > 0 and B > 0: Mixed
//! 2. A > 0 only: A
//! 3. B > 0 only: B
//! 4. Neither: Other if the Other score reaches the threshold, else Mixed
//!
//! Mixed is the safe default; Other must be earned.

use crate::policy::ScoringPolicy;
use crate::scorer::Evidence;
use crate::types::{
    AttributionDetail, AttributionLabel, CanonicalEntity, ClassifiedEntity, ScoreTriple,
};

/// Decide the label for a score triple
pub fn decide(scores: ScoreTriple, threshold: u32) -> AttributionLabel {
    match (scores.a > 0, scores.b > 0) {
        (true, true) => AttributionLabel::Mixed,
        (true, false) => AttributionLabel::A,
        (false, true) => AttributionLabel::B,
        (false, false) if scores.other >= threshold => AttributionLabel::Other,
        (false, false) => AttributionLabel::Mixed,
    }
}

/// Annotate an entity with its label and capped audit detail
pub fn annotate(
    entity: CanonicalEntity,
    evidence: Evidence,
    policy: &ScoringPolicy,
) -> ClassifiedEntity {
    let scores = evidence.total();
    let attribution = decide(scores, policy.threshold);

    let mut hits = evidence.hits;
    let hits_truncated = hits.len().saturating_sub(policy.hits_cap);
    hits.truncate(policy.hits_cap);

    ClassifiedEntity {
        entity,
        attribution,
        attribution_name: policy.label_name(attribution).to_string(),
        attribution_detail: AttributionDetail {
            scores,
            structured_scores: evidence.structured,
            text_scores: evidence.text,
            other_breakdown: evidence.other_breakdown,
            hits,
            hits_truncated,
            policy: policy.summary(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truth_table() {
        let t = 4;
        assert_eq!(decide(ScoreTriple::new(1, 1, 0), t), AttributionLabel::Mixed);
        assert_eq!(decide(ScoreTriple::new(5, 0, 9), t), AttributionLabel::A);
        assert_eq!(decide(ScoreTriple::new(0, 2, 9), t), AttributionLabel::B);
        assert_eq!(decide(ScoreTriple::new(0, 0, 4), t), AttributionLabel::Other);
        assert_eq!(decide(ScoreTriple::new(0, 0, 3), t), AttributionLabel::Mixed);
        assert_eq!(decide(ScoreTriple::new(0, 0, 0), t), AttributionLabel::Mixed);
    }

    #[test]
    fn test_both_present_is_mixed_regardless_of_other() {
        assert_eq!(
            decide(ScoreTriple::new(8, 1, 100), 4),
            AttributionLabel::Mixed
        );
    }

    #[test]
    fn test_annotate_caps_hits() {
        let policy = ScoringPolicy {
            hits_cap: 2,
            ..Default::default()
        };
        let evidence = Evidence {
            structured: ScoreTriple::new(12, 0, 0),
            hits: vec!["a".into(), "b".into(), "c".into()],
            ..Default::default()
        };

        let classified = annotate(CanonicalEntity::default(), evidence, &policy);
        assert_eq!(classified.attribution, AttributionLabel::A);
        assert_eq!(classified.attribution_name, "Russian");
        assert_eq!(classified.attribution_detail.hits.len(), 2);
        assert_eq!(classified.attribution_detail.hits_truncated, 1);
        assert!(classified.attribution_detail.policy.other_is_strict);
    }
}
