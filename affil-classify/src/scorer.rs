//! Evidence Scorer
//!
//! Pure function of (canonical entity, place-country index, policy, pattern
//! library). The scorer holds only immutable configuration, so entities can be
//! scored independently, in any order or in parallel.
//!
//! # Structured Evidence
//! For each relation kind in priority order, each target in sorted order:
//! - target is a recognised country (A, B, allow-list): STRONG to its bucket
//! - otherwise, if the kind is place-like: MEDIUM for every recognised country
//!   the index resolves the place to
//!
//! # Text Evidence
//! Every (language, text) variant is matched against that language's patterns;
//! each matching pattern adds WEAK once per text.
//!
//! # Hit Format
//! - `{kind}:direct:{code}:{target}`
//! - `{kind}:place_country:{code}:{place}->{country}`
//! - `text:{lang}:{code}:{pattern}`
//!
//! where `code` is the affiliation code ("RU", "UA") or `OTHER:{tag}`.

use crate::patterns::PatternLibrary;
use crate::policy::{CountryMatch, ScoringPolicy};
use crate::resolver::PlaceCountryIndex;
use crate::types::{Bucket, CanonicalEntity, ScoreTriple};
use std::collections::BTreeMap;

/// Scoring result for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub structured: ScoreTriple,
    pub text: ScoreTriple,
    /// Other score split by third-party tag
    pub other_breakdown: BTreeMap<String, u32>,
    /// Structured hits first, then text hits, in evaluation order (uncapped)
    pub hits: Vec<String>,
}

impl Evidence {
    pub fn total(&self) -> ScoreTriple {
        self.structured + self.text
    }

    fn record_other(&mut self, tag: &str, weight: u32) {
        let slot = self.other_breakdown.entry(tag.to_string()).or_insert(0);
        *slot = slot.saturating_add(weight);
    }
}

/// Evidence Scorer
#[derive(Debug, Clone)]
pub struct EvidenceScorer {
    policy: ScoringPolicy,
    patterns: PatternLibrary,
}

impl EvidenceScorer {
    pub fn new(policy: ScoringPolicy, patterns: PatternLibrary) -> Self {
        Self { policy, patterns }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn patterns(&self) -> &PatternLibrary {
        &self.patterns
    }

    /// Score one entity
    pub fn score(&self, entity: &CanonicalEntity, index: &PlaceCountryIndex) -> Evidence {
        let mut evidence = Evidence::default();
        self.score_structured(entity, index, &mut evidence);
        self.score_text(entity, &mut evidence);
        evidence
    }

    fn score_structured(
        &self,
        entity: &CanonicalEntity,
        index: &PlaceCountryIndex,
        evidence: &mut Evidence,
    ) {
        let weights = self.policy.weights;

        for kind in &self.policy.relation_priority {
            for target in entity.targets(kind) {
                if let Some(matched) = self.policy.country_match(target) {
                    self.add_structured(evidence, matched, weights.strong);
                    evidence.hits.push(format!(
                        "{}:direct:{}:{}",
                        kind,
                        self.policy.hit_code(matched),
                        target
                    ));
                    continue;
                }

                if !self.policy.is_place_relation(kind) {
                    continue;
                }

                for country in index.lookup(target) {
                    let Some(matched) = self.policy.country_match(country) else {
                        continue;
                    };
                    self.add_structured(evidence, matched, weights.medium);
                    evidence.hits.push(format!(
                        "{}:place_country:{}:{}->{}",
                        kind,
                        self.policy.hit_code(matched),
                        target,
                        country
                    ));
                }
            }
        }
    }

    fn add_structured(&self, evidence: &mut Evidence, matched: CountryMatch<'_>, weight: u32) {
        evidence.structured.add_to(matched.bucket(), weight);
        if let CountryMatch::Other(tag) = matched {
            evidence.record_other(tag, weight);
        }
    }

    fn score_text(&self, entity: &CanonicalEntity, evidence: &mut Evidence) {
        let weak = self.policy.weights.weak;

        for (lang, text) in entity.texts() {
            for pattern in self.patterns.matches(lang, text) {
                evidence.text.add_to(pattern.bucket, weak);

                let code = match (pattern.bucket, pattern.tag.as_deref()) {
                    (Bucket::A, _) => self.policy.affiliation_a.code.clone(),
                    (Bucket::B, _) => self.policy.affiliation_b.code.clone(),
                    (Bucket::Other, tag) => {
                        let tag = tag.unwrap_or(crate::policy::UNTAGGED_OTHER);
                        evidence.record_other(tag, weak);
                        format!("OTHER:{}", tag)
                    }
                };
                evidence
                    .hits
                    .push(format!("text:{}:{}:{}", lang, code, pattern.pattern));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn scorer() -> EvidenceScorer {
        EvidenceScorer::new(
            ScoringPolicy::default(),
            PatternLibrary::builtin().unwrap(),
        )
    }

    fn entity(relations: &[(&str, &str)]) -> CanonicalEntity {
        let mut entity = CanonicalEntity {
            id: "Q100".to_string(),
            ..Default::default()
        };
        for (kind, target) in relations {
            entity
                .relations
                .entry(kind.to_string())
                .or_default()
                .insert(target.to_string());
        }
        entity
    }

    #[test]
    fn test_direct_country_is_strong() {
        let evidence = scorer().score(&entity(&[("P27", "Q159")]), &PlaceCountryIndex::empty());
        assert_eq!(evidence.structured, ScoreTriple::new(4, 0, 0));
        assert_eq!(evidence.hits, vec!["P27:direct:RU:Q159".to_string()]);
    }

    #[test]
    fn test_place_resolves_through_index_as_medium() {
        let index = PlaceCountryIndex::from_entries([(
            "Q1899".to_string(),
            BTreeSet::from(["Q212".to_string()]),
        )]);
        let evidence = scorer().score(&entity(&[("P19", "Q1899")]), &index);

        assert_eq!(evidence.structured, ScoreTriple::new(0, 2, 0));
        assert_eq!(
            evidence.hits,
            vec!["P19:place_country:UA:Q1899->Q212".to_string()]
        );
    }

    #[test]
    fn test_non_place_kind_ignores_index() {
        let index = PlaceCountryIndex::from_entries([(
            "Q1899".to_string(),
            BTreeSet::from(["Q212".to_string()]),
        )]);
        let evidence = scorer().score(&entity(&[("P27", "Q1899")]), &index);
        assert_eq!(evidence.total(), ScoreTriple::default());
    }

    #[test]
    fn test_unlisted_relation_kind_ignored() {
        let evidence = scorer().score(&entity(&[("P937", "Q159")]), &PlaceCountryIndex::empty());
        assert!(evidence.hits.is_empty());
    }

    #[test]
    fn test_other_breakdown_by_tag() {
        let mut e = entity(&[("P27", "Q30"), ("P17", "Q148")]);
        e.labels
            .insert("en".to_string(), "Chinese American".to_string());
        let evidence = scorer().score(&e, &PlaceCountryIndex::empty());

        assert_eq!(evidence.structured.other, 8);
        assert_eq!(evidence.text.other, 2);
        assert_eq!(evidence.other_breakdown["American"], 5);
        assert_eq!(evidence.other_breakdown["Chinese"], 5);
    }

    #[test]
    fn test_text_hits_follow_structured_hits() {
        let mut e = entity(&[("P27", "Q212")]);
        e.descriptions
            .insert("en".to_string(), "Ukrainian politician".to_string());
        let evidence = scorer().score(&e, &PlaceCountryIndex::empty());

        assert_eq!(evidence.text, ScoreTriple::new(0, 1, 0));
        assert_eq!(evidence.hits[0], "P27:direct:UA:Q212");
        assert_eq!(evidence.hits[1], r"text:en:UA:\bukrain");
    }

    #[test]
    fn test_scoring_is_repeatable() {
        let mut e = entity(&[("P27", "Q159"), ("P159", "Q649")]);
        e.labels.insert("ru".to_string(), "Российский банк".to_string());
        let index = PlaceCountryIndex::from_entries([(
            "Q649".to_string(),
            BTreeSet::from(["Q159".to_string()]),
        )]);

        let s = scorer();
        assert_eq!(s.score(&e, &index), s.score(&e, &index));
    }
}
