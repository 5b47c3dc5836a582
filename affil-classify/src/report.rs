//! Run report
//!
//! Compact JSON summary written next to the output stream (no per-entity
//! examples; per-entity evidence lives in `attribution_detail.hits`).
//!
//! # Sections
//! - `pre_classify`: rows loaded, per-source-type profiles, overlap between
//!   exactly two inputs, merged language coverage and category hints
//! - `resolver`: places requested, resolved and unresolved
//! - `after_classify`: label counts

use crate::merger::MergeStats;
use crate::resolver::ResolveStats;
use crate::types::{AttributionLabel, CanonicalEntity, EntityId, RawRecord, SourceDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Languages counted in coverage figures
pub const COVERAGE_LANGUAGES: [&str; 3] = ["en", "ru", "uk"];

const UNKNOWN_SOURCE: &str = "unknown_source";
const UNKNOWN_HINT: &str = "unknown";

/// Profile of the rows harvested by one source type (first row per id)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceTypeProfile {
    pub unique_ids: usize,
    /// Ids with a non-empty label or description, per language
    pub language_coverage: BTreeMap<String, usize>,
    pub category_hint_counts: BTreeMap<String, usize>,
}

/// Identifier overlap between two input files
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputOverlap {
    pub a: PathBuf,
    pub b: PathBuf,
    pub a_unique: usize,
    pub b_unique: usize,
    pub intersection: usize,
    pub union: usize,
    pub jaccard: f64,
    pub a_only: usize,
    pub b_only: usize,
}

impl InputOverlap {
    fn between(a: &InputIds, b: &InputIds) -> Self {
        let intersection = a.ids.intersection(&b.ids).count();
        let union = a.ids.union(&b.ids).count();
        Self {
            a: a.path.clone(),
            b: b.path.clone(),
            a_unique: a.ids.len(),
            b_unique: b.ids.len(),
            intersection,
            union,
            jaccard: if union == 0 {
                0.0
            } else {
                intersection as f64 / union as f64
            },
            a_only: a.ids.len() - intersection,
            b_only: b.ids.len() - intersection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreClassify {
    pub rows_loaded: usize,
    pub malformed_lines: usize,
    pub missing_id: usize,
    pub unique_ids_merged: usize,
    pub by_source_type: BTreeMap<String, SourceTypeProfile>,
    pub overlap_between_inputs: Option<InputOverlap>,
    pub merged_language_coverage: BTreeMap<String, usize>,
    pub merged_category_hint_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AfterClassify {
    pub attribution_counts: BTreeMap<AttributionLabel, usize>,
}

/// Complete run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// First harvester origin (start URL or endpoint) found on the merged records
    pub start_origin: Option<String>,
    pub pre_classify: PreClassify,
    pub resolver: ResolveStats,
    pub after_classify: AfterClassify,
}

// ============================================================================
// Builder
// ============================================================================

/// Facts kept per (source type, id) for the pre-classify profile
#[derive(Debug, Clone)]
struct RowFacts {
    covered: Vec<&'static str>,
    hint: String,
}

#[derive(Debug, Clone)]
struct InputIds {
    path: PathBuf,
    ids: BTreeSet<EntityId>,
}

/// Collects input facts while files are read, then produces the [`RunReport`]
#[derive(Debug, Default)]
pub struct ReportBuilder {
    by_source_type: BTreeMap<String, BTreeMap<EntityId, RowFacts>>,
    inputs: Vec<InputIds>,
}

fn non_empty(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

fn first_hint(sources: &[SourceDescriptor]) -> String {
    sources
        .iter()
        .find_map(|s| s.hint.clone().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| UNKNOWN_HINT.to_string())
}

fn count_coverage<'a, I>(covered: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a [&'static str]>,
{
    let mut counts: BTreeMap<String, usize> = COVERAGE_LANGUAGES
        .iter()
        .map(|lang| (lang.to_string(), 0))
        .collect();
    for langs in covered {
        for lang in langs {
            *counts.entry(lang.to_string()).or_default() += 1;
        }
    }
    counts
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the rows of one input file (before merging)
    pub fn observe_input(&mut self, path: &Path, rows: &[RawRecord]) {
        let mut ids = BTreeSet::new();

        for row in rows {
            let Some(id) = row.identifier() else {
                continue;
            };
            ids.insert(id.to_string());

            let provenance = row.provenance();
            let source_type = provenance
                .iter()
                .find_map(|s| s.source_type.clone())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

            let covered: Vec<&'static str> = COVERAGE_LANGUAGES
                .iter()
                .copied()
                .filter(|lang| {
                    non_empty(row.labels.get(*lang).and_then(|v| v.as_deref()))
                        || non_empty(row.descriptions.get(*lang).and_then(|v| v.as_deref()))
                })
                .collect();

            self.by_source_type
                .entry(source_type)
                .or_default()
                .entry(id.to_string())
                .or_insert_with(|| RowFacts {
                    covered,
                    hint: first_hint(&provenance),
                });
        }

        self.inputs.push(InputIds {
            path: path.to_path_buf(),
            ids,
        });
    }

    /// Produce the report
    pub fn build(
        self,
        run_id: Uuid,
        read: ReadSummary,
        merge: MergeStats,
        merged: &[&CanonicalEntity],
        resolver: ResolveStats,
        attribution_counts: BTreeMap<AttributionLabel, usize>,
    ) -> RunReport {
        let by_source_type = self
            .by_source_type
            .into_iter()
            .map(|(source_type, rows)| {
                let mut hints: BTreeMap<String, usize> = BTreeMap::new();
                for facts in rows.values() {
                    *hints.entry(facts.hint.clone()).or_default() += 1;
                }
                let profile = SourceTypeProfile {
                    unique_ids: rows.len(),
                    language_coverage: count_coverage(rows.values().map(|f| f.covered.as_slice())),
                    category_hint_counts: hints,
                };
                (source_type, profile)
            })
            .collect();

        let overlap_between_inputs = match self.inputs.as_slice() {
            [a, b] => Some(InputOverlap::between(a, b)),
            _ => None,
        };

        let merged_covered: Vec<Vec<&'static str>> = merged
            .iter()
            .map(|entity| {
                COVERAGE_LANGUAGES
                    .iter()
                    .copied()
                    .filter(|lang| {
                        non_empty(entity.labels.get(*lang).map(String::as_str))
                            || non_empty(entity.descriptions.get(*lang).map(String::as_str))
                    })
                    .collect()
            })
            .collect();

        let mut merged_hints: BTreeMap<String, usize> = BTreeMap::new();
        for entity in merged {
            *merged_hints.entry(first_hint(&entity.sources)).or_default() += 1;
        }

        let start_origin = merged
            .iter()
            .flat_map(|entity| entity.sources.iter())
            .find_map(|s| s.origin.clone().filter(|o| !o.is_empty()));

        RunReport {
            run_id,
            generated_at: Utc::now(),
            start_origin,
            pre_classify: PreClassify {
                rows_loaded: read.rows,
                malformed_lines: read.malformed_lines,
                missing_id: merge.missing_id,
                unique_ids_merged: merge.canonical_entities,
                by_source_type,
                overlap_between_inputs,
                merged_language_coverage: count_coverage(merged_covered.iter().map(Vec::as_slice)),
                merged_category_hint_counts: merged_hints,
            },
            resolver,
            after_classify: AfterClassify { attribution_counts },
        }
    }
}

/// Row counts the report needs from the reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub rows: usize,
    pub malformed_lines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> RawRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_overlap_reported_for_two_inputs() {
        let mut builder = ReportBuilder::new();
        builder.observe_input(
            Path::new("a.jsonl"),
            &[row(json!({"id": "Q1"})), row(json!({"id": "Q2"}))],
        );
        builder.observe_input(
            Path::new("b.jsonl"),
            &[row(json!({"id": "Q2"})), row(json!({"id": "Q3"}))],
        );

        let report = builder.build(
            Uuid::new_v4(),
            ReadSummary::default(),
            MergeStats::default(),
            &[],
            ResolveStats::default(),
            BTreeMap::new(),
        );
        let overlap = report.pre_classify.overlap_between_inputs.unwrap();
        assert_eq!(overlap.intersection, 1);
        assert_eq!(overlap.union, 3);
        assert_eq!(overlap.a_only, 1);
        assert!((overlap.jaccard - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_source_type_profile_counts_first_row_per_id() {
        let mut builder = ReportBuilder::new();
        builder.observe_input(
            Path::new("wd.jsonl"),
            &[
                row(json!({"id": "Q1", "labels": {"en": "x", "ru": ""},
                    "source": {"type": "wikidata_sparql", "hint": "person"}})),
                row(json!({"id": "Q1", "labels": {"uk": "y"},
                    "source": {"type": "wikidata_sparql", "hint": "event"}})),
                row(json!({"id": "Q2", "descriptions": {"uk": "z"}})),
            ],
        );

        let report = builder.build(
            Uuid::new_v4(),
            ReadSummary::default(),
            MergeStats::default(),
            &[],
            ResolveStats::default(),
            BTreeMap::new(),
        );
        let by_type = &report.pre_classify.by_source_type;
        let wikidata = &by_type["wikidata_sparql"];
        assert_eq!(wikidata.unique_ids, 1);
        assert_eq!(wikidata.language_coverage["en"], 1);
        assert_eq!(wikidata.language_coverage["uk"], 0);
        assert_eq!(wikidata.category_hint_counts["person"], 1);
        assert_eq!(by_type["unknown_source"].category_hint_counts["unknown"], 1);
        assert!(report.pre_classify.overlap_between_inputs.is_none());
    }
}
