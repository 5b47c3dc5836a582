//! Record model for the classifier
//!
//! - [`RawRecord`]: one harvested row as read from JSONL
//! - [`CanonicalEntity`]: one merged record per identifier
//! - [`ScoreTriple`], [`Bucket`], [`AttributionLabel`]: scoring vocabulary
//! - [`ClassifiedEntity`]: canonical entity annotated with its label and audit detail
//!
//! Harvester output from older runs uses `qid`, `instance_of`, `raw_attrib_qids`
//! and `source.page`; those keys are accepted as aliases.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};

/// Opaque graph identifier (e.g. "Q159")
pub type EntityId = String;

/// Top-level keys written by the classifier itself; never carried as extra fields
pub const RESERVED_OUTPUT_KEYS: &[&str] = &["attribution", "attribution_name", "attribution_detail"];

/// Treat an explicit JSON `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Input
// ============================================================================

/// Provenance descriptor of a harvested row
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Harvester kind (e.g. "wikidata_sparql", "wikipedia_navboxes")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Category hint assigned by the harvester (e.g. "person", "event")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Where the harvester started (URL, endpoint)
    #[serde(default, alias = "page", skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Provenance of each winning scalar value in a merged record
///
/// Written with merged output so the record can be merged again without the
/// values being re-ranked under its best source type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarSources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, SourceDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptions: BTreeMap<String, SourceDescriptor>,
    /// Extra fields holding a single value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, SourceDescriptor>,
    /// Extra fields holding an object, per object key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_fields: BTreeMap<String, BTreeMap<String, SourceDescriptor>>,
}

impl ScalarSources {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.descriptions.is_empty()
            && self.extra.is_empty()
            && self.extra_fields.is_empty()
    }
}

/// One harvested row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "qid", deserialize_with = "null_as_default")]
    pub id: Option<EntityId>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, Option<String>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub descriptions: BTreeMap<String, Option<String>>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: BTreeMap<String, Vec<String>>,

    #[serde(default, alias = "instance_of", deserialize_with = "null_as_default")]
    pub type_tags: Vec<String>,

    #[serde(default, alias = "raw_attrib_qids", deserialize_with = "null_as_default")]
    pub relations: BTreeMap<String, Vec<EntityId>>,

    /// Single provenance descriptor (harvester output)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,

    /// Accumulated provenance (previously merged output fed back in)
    #[serde(default, alias = "_sources", deserialize_with = "null_as_default")]
    pub sources: Vec<SourceDescriptor>,

    /// Per-field provenance carried by previously merged output
    #[serde(
        rename = "_scalar_sources",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "ScalarSources::is_empty"
    )]
    pub scalar_sources: ScalarSources,

    /// Any other top-level key (uri, sitelinks, wiki_titles, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RawRecord {
    /// Identifier if present and non-blank
    pub fn identifier(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Provenance descriptors this row contributes (at least one)
    pub fn provenance(&self) -> Vec<SourceDescriptor> {
        let mut descriptors: Vec<SourceDescriptor> = self.source.iter().cloned().collect();
        descriptors.extend(self.sources.iter().cloned());
        if descriptors.is_empty() {
            descriptors.push(SourceDescriptor::default());
        }
        descriptors
    }
}

// ============================================================================
// Canonical entity
// ============================================================================

/// One merged record per identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub labels: BTreeMap<String, String>,
    pub descriptions: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, BTreeSet<String>>,
    pub type_tags: BTreeSet<String>,
    pub relations: BTreeMap<String, BTreeSet<EntityId>>,
    /// One descriptor per contributing raw record, not deduplicated
    pub sources: Vec<SourceDescriptor>,
    /// Source of each winning label, description and extra field
    #[serde(
        rename = "_scalar_sources",
        default,
        skip_serializing_if = "ScalarSources::is_empty"
    )]
    pub scalar_sources: ScalarSources,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CanonicalEntity {
    /// Targets of one relation kind (empty if the kind is absent)
    pub fn targets(&self, kind: &str) -> impl Iterator<Item = &EntityId> {
        self.relations.get(kind).into_iter().flatten()
    }

    /// Every (language, text) pair the text scan covers: label, description, then aliases
    pub fn texts(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        let languages: BTreeSet<&str> = self
            .labels
            .keys()
            .chain(self.descriptions.keys())
            .chain(self.aliases.keys())
            .map(String::as_str)
            .collect();

        for lang in languages {
            if let Some(label) = self.labels.get(lang) {
                out.push((lang, label.as_str()));
            }
            if let Some(description) = self.descriptions.get(lang) {
                out.push((lang, description.as_str()));
            }
            for alias in self.aliases.get(lang).into_iter().flatten() {
                out.push((lang, alias.as_str()));
            }
        }
        out
    }
}

impl From<CanonicalEntity> for RawRecord {
    /// Re-enter a merged record as input (provenance list and per-field sources kept intact)
    fn from(entity: CanonicalEntity) -> Self {
        RawRecord {
            id: Some(entity.id),
            labels: entity
                .labels
                .into_iter()
                .map(|(lang, value)| (lang, Some(value)))
                .collect(),
            descriptions: entity
                .descriptions
                .into_iter()
                .map(|(lang, value)| (lang, Some(value)))
                .collect(),
            aliases: entity
                .aliases
                .into_iter()
                .map(|(lang, set)| (lang, set.into_iter().collect()))
                .collect(),
            type_tags: entity.type_tags.into_iter().collect(),
            relations: entity
                .relations
                .into_iter()
                .map(|(kind, set)| (kind, set.into_iter().collect()))
                .collect(),
            source: None,
            sources: entity.sources,
            scalar_sources: entity.scalar_sources,
            extra: entity.extra,
        }
    }
}

// ============================================================================
// Scoring vocabulary
// ============================================================================

/// Score bucket an evidence item contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    A,
    B,
    Other,
}

/// Non-negative additive (A, B, Other) score vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreTriple {
    pub a: u32,
    pub b: u32,
    pub other: u32,
}

impl ScoreTriple {
    pub fn new(a: u32, b: u32, other: u32) -> Self {
        Self { a, b, other }
    }

    /// Add `weight` to one bucket (saturating)
    pub fn add_to(&mut self, bucket: Bucket, weight: u32) {
        let slot = match bucket {
            Bucket::A => &mut self.a,
            Bucket::B => &mut self.b,
            Bucket::Other => &mut self.other,
        };
        *slot = slot.saturating_add(weight);
    }

    pub fn get(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::A => self.a,
            Bucket::B => self.b,
            Bucket::Other => self.other,
        }
    }
}

impl Add for ScoreTriple {
    type Output = ScoreTriple;

    fn add(self, rhs: ScoreTriple) -> ScoreTriple {
        ScoreTriple {
            a: self.a.saturating_add(rhs.a),
            b: self.b.saturating_add(rhs.b),
            other: self.other.saturating_add(rhs.other),
        }
    }
}

impl AddAssign for ScoreTriple {
    fn add_assign(&mut self, rhs: ScoreTriple) {
        *self = *self + rhs;
    }
}

/// Final affiliation label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributionLabel {
    A,
    B,
    Mixed,
    Other,
}

impl AttributionLabel {
    pub const ALL: [AttributionLabel; 4] = [
        AttributionLabel::A,
        AttributionLabel::B,
        AttributionLabel::Mixed,
        AttributionLabel::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionLabel::A => "A",
            AttributionLabel::B => "B",
            AttributionLabel::Mixed => "Mixed",
            AttributionLabel::Other => "Other",
        }
    }
}

impl std::fmt::Display for AttributionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Output
// ============================================================================

/// Weight table echoed into every output record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    pub strong: u32,
    pub medium: u32,
    pub weak: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            strong: 4,
            medium: 2,
            weak: 1,
        }
    }
}

/// Policy summary attached to each decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub threshold: u32,
    pub other_is_strict: bool,
    pub weights: Weights,
}

/// Audit detail attached to each classified entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionDetail {
    pub scores: ScoreTriple,
    pub structured_scores: ScoreTriple,
    pub text_scores: ScoreTriple,
    /// Other score split by third-party tag
    pub other_breakdown: BTreeMap<String, u32>,
    pub hits: Vec<String>,
    /// Hits dropped by the cap
    pub hits_truncated: usize,
    pub policy: PolicySummary,
}

/// Canonical entity with its final label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEntity {
    #[serde(flatten)]
    pub entity: CanonicalEntity,
    pub attribution: AttributionLabel,
    pub attribution_name: String,
    pub attribution_detail: AttributionDetail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_accepts_legacy_keys() {
        let line = r#"{"qid":"Q1","instance_of":["Q5"],"raw_attrib_qids":{"P27":["Q159"]},
            "labels":{"en":"Ivan","ru":null},"source":{"type":"wikidata_sparql","page":"https://x","hint":"person"},
            "uri":"http://www.wikidata.org/entity/Q1"}"#;
        let record: RawRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.identifier(), Some("Q1"));
        assert_eq!(record.type_tags, vec!["Q5".to_string()]);
        assert_eq!(record.relations["P27"], vec!["Q159".to_string()]);
        assert_eq!(record.labels.get("ru"), Some(&None));
        let source = record.source.as_ref().unwrap();
        assert_eq!(source.origin.as_deref(), Some("https://x"));
        assert!(record.extra.contains_key("uri"));
        assert!(!record.extra.contains_key("qid"));
    }

    #[test]
    fn test_null_collections_are_empty() {
        let record: RawRecord =
            serde_json::from_str(r#"{"id":"Q2","aliases":null,"relations":null}"#).unwrap();
        assert!(record.aliases.is_empty());
        assert!(record.relations.is_empty());
    }

    #[test]
    fn test_blank_identifier_is_missing() {
        let record: RawRecord = serde_json::from_str(r#"{"id":"  "}"#).unwrap();
        assert_eq!(record.identifier(), None);
    }

    #[test]
    fn test_provenance_never_empty() {
        let record = RawRecord::default();
        assert_eq!(record.provenance().len(), 1);
    }

    #[test]
    fn test_score_triple_add() {
        let mut total = ScoreTriple::new(4, 0, 0);
        total += ScoreTriple::new(1, 2, 3);
        assert_eq!(total, ScoreTriple::new(5, 2, 3));

        total.add_to(Bucket::Other, 4);
        assert_eq!(total.get(Bucket::Other), 7);
    }

    #[test]
    fn test_label_serializes_as_plain_string() {
        let json = serde_json::to_string(&AttributionLabel::Mixed).unwrap();
        assert_eq!(json, "\"Mixed\"");
    }

    #[test]
    fn test_texts_cover_label_description_aliases() {
        let mut entity = CanonicalEntity {
            id: "Q1".to_string(),
            ..Default::default()
        };
        entity.labels.insert("en".into(), "Label".into());
        entity.descriptions.insert("ru".into(), "Описание".into());
        entity
            .aliases
            .entry("en".into())
            .or_default()
            .insert("Alias".into());

        let texts = entity.texts();
        assert_eq!(
            texts,
            vec![("en", "Label"), ("en", "Alias"), ("ru", "Описание")]
        );
    }
}
