//! Scoring policy
//!
//! Immutable configuration shared by the scorer and the decider: the two
//! affiliations, the third-party allow-list, relation kinds, weights and the
//! strictness threshold.

use crate::types::{AttributionLabel, Bucket, CanonicalEntity, PolicySummary, Weights};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Defaults
// ============================================================================

/// Minimum Other score that may label an entity Other without A/B evidence
pub const DEFAULT_THRESHOLD: u32 = 4;

/// Hits kept in the output audit list
pub const DEFAULT_HITS_CAP: usize = 200;

/// Relation kinds scanned for structured evidence, in evaluation order
pub const DEFAULT_RELATION_PRIORITY: &[&str] = &[
    "P27",  // citizenship
    "P17",  // country
    "P495", // country of origin
    "P159", // headquarters location
    "P131", // located in administrative entity
    "P276", // location
    "P19",  // place of birth
    "P740", // location of formation
    "P551", // residence
];

/// Relation kinds whose targets are places to resolve through the index
pub const DEFAULT_PLACE_RELATIONS: &[&str] = &["P159", "P131", "P276", "P19", "P740", "P551"];

/// Third-party countries recognised as Other evidence (id, tag)
pub const DEFAULT_OTHER_COUNTRIES: &[(&str, &str)] = &[
    ("Q30", "American"),
    ("Q148", "Chinese"),
    ("Q183", "German"),
    ("Q145", "British"),
    ("Q142", "French"),
    ("Q36", "Polish"),
    ("Q184", "Belarusian"),
    ("Q458", "EU"),
];

/// Tag used for Other evidence with no more specific tag
pub const UNTAGGED_OTHER: &str = "other";

// ============================================================================
// Policy
// ============================================================================

/// One side of the binary classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affiliation {
    /// Country identifier (e.g. "Q159")
    pub country: String,
    /// Display name written as `attribution_name`
    pub name: String,
    /// Short code used in hit strings (e.g. "RU")
    pub code: String,
}

/// Bucket a country identifier falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryMatch<'a> {
    A,
    B,
    Other(&'a str),
}

impl CountryMatch<'_> {
    pub fn bucket(&self) -> Bucket {
        match self {
            CountryMatch::A => Bucket::A,
            CountryMatch::B => Bucket::B,
            CountryMatch::Other(_) => Bucket::Other,
        }
    }
}

/// Validated scoring policy
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    pub affiliation_a: Affiliation,
    pub affiliation_b: Affiliation,
    /// Third-party allow-list: country id -> tag
    pub other_countries: BTreeMap<String, String>,
    pub relation_priority: Vec<String>,
    pub place_relations: BTreeSet<String>,
    pub weights: Weights,
    pub threshold: u32,
    pub hits_cap: usize,
    pub mixed_name: String,
    pub other_name: String,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            affiliation_a: Affiliation {
                country: "Q159".to_string(),
                name: "Russian".to_string(),
                code: "RU".to_string(),
            },
            affiliation_b: Affiliation {
                country: "Q212".to_string(),
                name: "Ukraine".to_string(),
                code: "UA".to_string(),
            },
            other_countries: DEFAULT_OTHER_COUNTRIES
                .iter()
                .map(|(id, tag)| (id.to_string(), tag.to_string()))
                .collect(),
            relation_priority: DEFAULT_RELATION_PRIORITY
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            place_relations: DEFAULT_PLACE_RELATIONS
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            weights: Weights::default(),
            threshold: DEFAULT_THRESHOLD,
            hits_cap: DEFAULT_HITS_CAP,
            mixed_name: "Mixed".to_string(),
            other_name: "Other".to_string(),
        }
    }
}

impl ScoringPolicy {
    /// Classify a country identifier (None when unrecognised)
    pub fn country_match(&self, country: &str) -> Option<CountryMatch<'_>> {
        if country == self.affiliation_a.country {
            Some(CountryMatch::A)
        } else if country == self.affiliation_b.country {
            Some(CountryMatch::B)
        } else {
            self.other_countries
                .get(country)
                .map(|tag| CountryMatch::Other(tag.as_str()))
        }
    }

    pub fn is_place_relation(&self, kind: &str) -> bool {
        self.place_relations.contains(kind)
    }

    /// Every country identifier the policy recognises
    pub fn recognised_countries(&self) -> BTreeSet<&str> {
        let mut ids: BTreeSet<&str> = self.other_countries.keys().map(String::as_str).collect();
        ids.insert(self.affiliation_a.country.as_str());
        ids.insert(self.affiliation_b.country.as_str());
        ids
    }

    /// Place identifiers to resolve: place-like relation targets that are not
    /// already recognised countries
    pub fn place_targets(&self, entities: &[CanonicalEntity]) -> BTreeSet<String> {
        let recognised = self.recognised_countries();
        entities
            .iter()
            .flat_map(|entity| {
                entity
                    .relations
                    .iter()
                    .filter(|(kind, _)| self.is_place_relation(kind))
                    .flat_map(|(_, targets)| targets.iter())
            })
            .filter(|target| !recognised.contains(target.as_str()))
            .cloned()
            .collect()
    }

    /// Audit code of a match ("RU", "UA", "OTHER:American")
    pub fn hit_code(&self, matched: CountryMatch<'_>) -> String {
        match matched {
            CountryMatch::A => self.affiliation_a.code.clone(),
            CountryMatch::B => self.affiliation_b.code.clone(),
            CountryMatch::Other(tag) => format!("OTHER:{}", tag),
        }
    }

    /// Display name written next to the label
    pub fn label_name(&self, label: AttributionLabel) -> &str {
        match label {
            AttributionLabel::A => &self.affiliation_a.name,
            AttributionLabel::B => &self.affiliation_b.name,
            AttributionLabel::Mixed => &self.mixed_name,
            AttributionLabel::Other => &self.other_name,
        }
    }

    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            threshold: self.threshold,
            other_is_strict: true,
            weights: self.weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_match() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.country_match("Q159"), Some(CountryMatch::A));
        assert_eq!(policy.country_match("Q212"), Some(CountryMatch::B));
        assert_eq!(
            policy.country_match("Q30"),
            Some(CountryMatch::Other("American"))
        );
        assert_eq!(policy.country_match("Q649"), None);
    }

    #[test]
    fn test_place_targets_skip_countries_and_non_place_kinds() {
        let policy = ScoringPolicy::default();
        let mut entity = CanonicalEntity {
            id: "Q1".to_string(),
            ..Default::default()
        };
        entity.relations.insert(
            "P19".to_string(),
            ["Q649".to_string(), "Q159".to_string()].into(),
        );
        entity
            .relations
            .insert("P27".to_string(), ["Q1899".to_string()].into());

        let places = policy.place_targets(&[entity]);
        assert_eq!(places, BTreeSet::from(["Q649".to_string()]));
    }

    #[test]
    fn test_hit_codes() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.hit_code(CountryMatch::A), "RU");
        assert_eq!(policy.hit_code(CountryMatch::Other("Chinese")), "OTHER:Chinese");
        assert_eq!(policy.label_name(AttributionLabel::B), "Ukraine");
    }
}
