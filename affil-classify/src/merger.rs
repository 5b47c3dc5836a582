//! Record Merger
//!
//! Unions harvested rows into one [`CanonicalEntity`] per identifier.
//!
//! # Field-wise Merge
//! - **Scalar fields** (per-language labels/descriptions, extra fields): the
//!   contribution with the smallest key `(precedence rank, origin, hint, value)`
//!   wins. The key is a total order, so the winner does not depend on the
//!   physical order of the input rows.
//! - **Set-valued fields** (aliases, type tags, relation targets): union, deduplicated.
//! - **Provenance**: one descriptor per contributing row, appended.
//!
//! Rows without an identifier are dropped and counted.
//!
//! # Partitioned Merge
//! [`RecordMerger::partition`] folds any slice of rows into a [`MergePartition`];
//! [`RecordMerger::finish`] joins partitions at a single serialization point.
//! [`EntityAccumulator::join`] is commutative, associative and idempotent on
//! scalar and set-valued fields, so partitions may be built concurrently.

use crate::types::{
    CanonicalEntity, EntityId, RawRecord, ScalarSources, SourceDescriptor, RESERVED_OUTPUT_KEYS,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

// ============================================================================
// Source precedence
// ============================================================================

/// Explicit source precedence (first listed source type wins scalar fields)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePrecedence {
    order: Vec<String>,
}

impl SourcePrecedence {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    /// Rank of a source type; unlisted (or absent) types rank after every listed type
    pub fn rank(&self, source_type: Option<&str>) -> usize {
        source_type
            .and_then(|t| self.order.iter().position(|o| o == t))
            .unwrap_or(self.order.len())
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// Ordering key of a scalar contribution (smaller wins)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateKey {
    rank: usize,
    origin: String,
    hint: String,
    tiebreak: String,
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate<T> {
    key: CandidateKey,
    /// Descriptor the key was built from, written to the canonical record
    source: SourceDescriptor,
    value: T,
}

/// Keep the better of the current slot and the offered candidate
fn offer<T>(slot: &mut Option<Candidate<T>>, candidate: Candidate<T>) {
    let better = match slot {
        Some(current) => candidate.key < current.key,
        None => true,
    };
    if better {
        *slot = Some(candidate);
    }
}

/// Merge two keyed candidate maps, keeping the better candidate per key
fn join_candidates<T>(
    into: &mut BTreeMap<String, Candidate<T>>,
    from: BTreeMap<String, Candidate<T>>,
) {
    for (key, candidate) in from {
        let mut slot = into.remove(&key);
        offer(&mut slot, candidate);
        if let Some(best) = slot {
            into.insert(key, best);
        }
    }
}

/// Split winning candidates into values and their sources
fn split_winners<T>(
    candidates: BTreeMap<String, Candidate<T>>,
) -> (BTreeMap<String, T>, BTreeMap<String, SourceDescriptor>) {
    let mut values = BTreeMap::new();
    let mut sources = BTreeMap::new();
    for (key, candidate) in candidates {
        values.insert(key.clone(), candidate.value);
        sources.insert(key, candidate.source);
    }
    (values, sources)
}

/// Contribution context of one row
///
/// Fields without recorded provenance are ranked by the row's best descriptor;
/// fields of re-entered merged output keep the descriptor they won with.
#[derive(Debug, Clone)]
struct Contributor<'a> {
    precedence: &'a SourcePrecedence,
    best: SourceDescriptor,
}

impl<'a> Contributor<'a> {
    fn of(record: &RawRecord, precedence: &'a SourcePrecedence) -> Self {
        let best = record
            .provenance()
            .into_iter()
            .min_by_key(|d| {
                (
                    precedence.rank(d.source_type.as_deref()),
                    d.origin.clone().unwrap_or_default(),
                    d.hint.clone().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        Self { precedence, best }
    }

    fn candidate<T>(
        &self,
        recorded: Option<&SourceDescriptor>,
        tiebreak: String,
        value: T,
    ) -> Candidate<T> {
        let source = recorded.unwrap_or(&self.best).clone();
        Candidate {
            key: CandidateKey {
                rank: self.precedence.rank(source.source_type.as_deref()),
                origin: source.origin.clone().unwrap_or_default(),
                hint: source.hint.clone().unwrap_or_default(),
                tiebreak,
            },
            source,
            value,
        }
    }
}

/// Extra (opaque) field: whole-value candidate plus per-key candidates for objects
#[derive(Debug, Clone, Default, PartialEq)]
struct ExtraSlot {
    whole: Option<Candidate<Value>>,
    fields: BTreeMap<String, Candidate<Value>>,
}

impl ExtraSlot {
    fn join(&mut self, other: ExtraSlot) {
        if let Some(candidate) = other.whole {
            offer(&mut self.whole, candidate);
        }
        join_candidates(&mut self.fields, other.fields);
    }

    /// Objects merge key by key; other values take the best whole candidate
    fn finish(self) -> Option<(Value, ExtraSource)> {
        if !self.fields.is_empty() {
            let (values, sources) = split_winners(self.fields);
            let object = values.into_iter().collect();
            return Some((Value::Object(object), ExtraSource::Fields(sources)));
        }
        self.whole
            .map(|candidate| (candidate.value, ExtraSource::Whole(candidate.source)))
    }
}

/// Provenance of a finished extra field
enum ExtraSource {
    Whole(SourceDescriptor),
    Fields(BTreeMap<String, SourceDescriptor>),
}

// ============================================================================
// Accumulator
// ============================================================================

/// Partially merged entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAccumulator {
    id: EntityId,
    labels: BTreeMap<String, Candidate<String>>,
    descriptions: BTreeMap<String, Candidate<String>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    type_tags: BTreeSet<String>,
    relations: BTreeMap<String, BTreeSet<EntityId>>,
    sources: Vec<SourceDescriptor>,
    extra: BTreeMap<String, ExtraSlot>,
}

impl EntityAccumulator {
    /// Start an accumulator from one row (caller has checked the identifier)
    pub fn from_record(id: &str, mut record: RawRecord, precedence: &SourcePrecedence) -> Self {
        let contributor = Contributor::of(&record, precedence);
        let sources = record.provenance();
        let mut recorded = std::mem::take(&mut record.scalar_sources);

        let labels = scalar_candidates(record.labels, &contributor, &recorded.labels);
        let descriptions =
            scalar_candidates(record.descriptions, &contributor, &recorded.descriptions);

        let aliases = record
            .aliases
            .into_iter()
            .map(|(lang, values)| (lang, non_empty_set(values)))
            .collect();

        let relations = record
            .relations
            .into_iter()
            .map(|(kind, targets)| (kind, non_empty_set(targets)))
            .collect();

        let mut extra = BTreeMap::new();
        for (key, value) in record.extra {
            if value.is_null() || RESERVED_OUTPUT_KEYS.contains(&key.as_str()) {
                continue;
            }
            let mut slot = ExtraSlot::default();
            match value {
                Value::Object(map) => {
                    let field_sources = recorded.extra_fields.remove(&key).unwrap_or_default();
                    for (field, field_value) in map {
                        if is_blank(&field_value) {
                            continue;
                        }
                        let tiebreak = field_value.to_string();
                        let candidate =
                            contributor.candidate(field_sources.get(&field), tiebreak, field_value);
                        slot.fields.insert(field, candidate);
                    }
                    if slot.fields.is_empty() {
                        continue;
                    }
                }
                other => {
                    let tiebreak = other.to_string();
                    slot.whole =
                        Some(contributor.candidate(recorded.extra.get(&key), tiebreak, other));
                }
            }
            extra.insert(key, slot);
        }

        Self {
            id: id.to_string(),
            labels,
            descriptions,
            aliases,
            type_tags: non_empty_set(record.type_tags),
            relations,
            sources,
            extra,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Join another partial record for the same identifier
    ///
    /// Provenance is concatenated (self first); every other field is an order-free join.
    pub fn join(&mut self, other: EntityAccumulator) {
        debug_assert_eq!(self.id, other.id);

        join_candidates(&mut self.labels, other.labels);
        join_candidates(&mut self.descriptions, other.descriptions);

        for (lang, values) in other.aliases {
            self.aliases.entry(lang).or_default().extend(values);
        }
        self.type_tags.extend(other.type_tags);
        for (kind, targets) in other.relations {
            self.relations.entry(kind).or_default().extend(targets);
        }

        self.sources.extend(other.sources);

        for (key, slot) in other.extra {
            self.extra.entry(key).or_default().join(slot);
        }
    }

    /// Produce the canonical record
    pub fn finish(self) -> CanonicalEntity {
        let (labels, label_sources) = split_winners(self.labels);
        let (descriptions, description_sources) = split_winners(self.descriptions);

        let mut scalar_sources = ScalarSources {
            labels: label_sources,
            descriptions: description_sources,
            ..Default::default()
        };

        let mut extra = BTreeMap::new();
        for (key, slot) in self.extra {
            let Some((value, source)) = slot.finish() else {
                continue;
            };
            match source {
                ExtraSource::Whole(descriptor) => {
                    scalar_sources.extra.insert(key.clone(), descriptor);
                }
                ExtraSource::Fields(fields) => {
                    scalar_sources.extra_fields.insert(key.clone(), fields);
                }
            }
            extra.insert(key, value);
        }

        CanonicalEntity {
            id: self.id,
            labels,
            descriptions,
            aliases: self.aliases,
            type_tags: self.type_tags,
            relations: self.relations,
            sources: self.sources,
            scalar_sources,
            extra,
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn scalar_candidates(
    values: BTreeMap<String, Option<String>>,
    contributor: &Contributor<'_>,
    recorded: &BTreeMap<String, SourceDescriptor>,
) -> BTreeMap<String, Candidate<String>> {
    values
        .into_iter()
        .filter_map(|(lang, value)| {
            let value = value.filter(|v| !v.trim().is_empty())?;
            let candidate = contributor.candidate(recorded.get(&lang), value.clone(), value);
            Some((lang, candidate))
        })
        .collect()
}

fn non_empty_set(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect()
}

// ============================================================================
// Merger
// ============================================================================

/// Merge statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Rows offered to the merger
    pub input_records: usize,
    /// Rows dropped for lacking an identifier
    pub missing_id: usize,
    /// Distinct identifiers produced
    pub canonical_entities: usize,
}

impl MergeStats {
    fn absorb(&mut self, other: MergeStats) {
        self.input_records += other.input_records;
        self.missing_id += other.missing_id;
    }
}

/// Accumulators for a disjoint slice of the input
#[derive(Debug, Default)]
pub struct MergePartition {
    accumulators: BTreeMap<EntityId, EntityAccumulator>,
    stats: MergeStats,
}

impl MergePartition {
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}

/// Merger output
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Canonical records sorted by identifier
    pub entities: Vec<CanonicalEntity>,
    pub stats: MergeStats,
}

/// Record Merger
///
/// # Example
/// ```rust,ignore
/// use affil_classify::merger::{RecordMerger, SourcePrecedence};
///
/// let merger = RecordMerger::new(SourcePrecedence::new(vec![
///     "wikidata_sparql".into(),
///     "wikipedia_navboxes".into(),
/// ]));
/// let output = merger.merge(records);
/// println!("{} canonical, {} dropped", output.stats.canonical_entities, output.stats.missing_id);
/// ```
#[derive(Debug, Clone)]
pub struct RecordMerger {
    precedence: SourcePrecedence,
}

impl RecordMerger {
    pub fn new(precedence: SourcePrecedence) -> Self {
        Self { precedence }
    }

    pub fn precedence(&self) -> &SourcePrecedence {
        &self.precedence
    }

    /// Merge rows into canonical records
    pub fn merge<I>(&self, records: I) -> MergeOutput
    where
        I: IntoIterator<Item = RawRecord>,
    {
        self.finish(vec![self.partition(records)])
    }

    /// Fold rows into a partition
    pub fn partition<I>(&self, records: I) -> MergePartition
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut partition = MergePartition::default();

        for record in records {
            partition.stats.input_records += 1;

            let Some(id) = record.identifier().map(str::to_string) else {
                partition.stats.missing_id += 1;
                warn!(
                    source = ?record.source,
                    "Dropping record without identifier"
                );
                continue;
            };

            let accumulator = EntityAccumulator::from_record(&id, record, &self.precedence);
            match partition.accumulators.get_mut(&id) {
                Some(existing) => existing.join(accumulator),
                None => {
                    partition.accumulators.insert(id, accumulator);
                }
            }
        }

        debug!(
            rows = partition.stats.input_records,
            identifiers = partition.accumulators.len(),
            "Partition folded"
        );
        partition
    }

    /// Join partitions and produce canonical records
    pub fn finish(&self, partitions: Vec<MergePartition>) -> MergeOutput {
        let mut merged: BTreeMap<EntityId, EntityAccumulator> = BTreeMap::new();
        let mut stats = MergeStats::default();

        for partition in partitions {
            stats.absorb(partition.stats);
            for (id, accumulator) in partition.accumulators {
                match merged.get_mut(&id) {
                    Some(existing) => existing.join(accumulator),
                    None => {
                        merged.insert(id, accumulator);
                    }
                }
            }
        }

        let entities: Vec<CanonicalEntity> = merged
            .into_values()
            .map(EntityAccumulator::finish)
            .collect();
        stats.canonical_entities = entities.len();

        info!(
            rows = stats.input_records,
            missing_id = stats.missing_id,
            canonical = stats.canonical_entities,
            "Merge complete"
        );

        MergeOutput { entities, stats }
    }
}
