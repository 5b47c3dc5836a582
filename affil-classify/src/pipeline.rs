//! Classification pipeline
//!
//! # Stages
//! 1. Read JSONL inputs (malformed lines counted and skipped)
//! 2. Merge rows into canonical entities (one partition per input file)
//! 3. Collect place identifiers referenced by place-like relations
//! 4. Resolve places to countries (batched, concurrent, retried)
//! 5. Apply the resolver failure policy
//! 6. Score and decide every entity (pure, order-independent)
//!
//! Steps 1-2 and 6 are synchronous; step 4 is the only I/O-bound stage.

use crate::config::{FailurePolicy, RunSettings};
use crate::decider::annotate;
use crate::error::ClassifyResult;
use crate::graph::GraphQuery;
use crate::merger::{MergePartition, MergeStats, RecordMerger};
use crate::report::{ReadSummary, ReportBuilder, RunReport};
use crate::resolver::{PlaceCountryIndex, PlaceCountryResolver, ResolveStats};
use crate::scorer::EvidenceScorer;
use crate::types::{AttributionLabel, CanonicalEntity, ClassifiedEntity, RawRecord};
use affil_common::jsonl::{collect_input_files, read_jsonl};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-file read statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub path: PathBuf,
    pub rows: usize,
    pub malformed_lines: usize,
}

/// Reader statistics across all inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadStats {
    pub files: Vec<FileStats>,
    pub rows: usize,
    pub malformed_lines: usize,
}

impl ReadStats {
    fn summary(&self) -> ReadSummary {
        ReadSummary {
            rows: self.rows,
            malformed_lines: self.malformed_lines,
        }
    }
}

/// Classified entities plus run statistics
#[derive(Debug, Clone)]
pub struct Classification {
    /// Annotated entities, sorted by identifier
    pub entities: Vec<ClassifiedEntity>,
    pub label_counts: BTreeMap<AttributionLabel, usize>,
    pub merge: MergeStats,
    pub resolver: ResolveStats,
    /// Places whose batch failed or was skipped (scored as if unresolvable)
    pub unresolved_places: usize,
}

/// Pipeline result for a file-based run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub classification: Classification,
    pub read: ReadStats,
    pub report: RunReport,
}

/// Classification pipeline
pub struct ClassificationPipeline {
    merger: RecordMerger,
    scorer: EvidenceScorer,
    resolver: PlaceCountryResolver,
    on_failure: FailurePolicy,
}

impl ClassificationPipeline {
    /// Build the pipeline from validated settings
    ///
    /// # Errors
    /// Invalid resolver settings
    pub fn new(settings: RunSettings, graph: Arc<dyn GraphQuery>) -> ClassifyResult<Self> {
        let resolver = PlaceCountryResolver::new(graph, settings.resolver)?;
        Ok(Self {
            merger: RecordMerger::new(settings.precedence),
            scorer: EvidenceScorer::new(settings.policy, settings.patterns),
            resolver,
            on_failure: settings.on_failure,
        })
    }

    pub fn scorer(&self) -> &EvidenceScorer {
        &self.scorer
    }

    /// Run over JSONL files or directories of JSONL files
    ///
    /// # Errors
    /// - Input path missing or unreadable
    /// - Resolver failure under the abort policy
    pub async fn run(
        &self,
        inputs: &[PathBuf],
        cancel: &CancellationToken,
    ) -> ClassifyResult<PipelineOutput> {
        let run_id = Uuid::new_v4();
        let span = info_span!("classify", run_id = %run_id);
        self.run_files(run_id, inputs, cancel).instrument(span).await
    }

    async fn run_files(
        &self,
        run_id: Uuid,
        inputs: &[PathBuf],
        cancel: &CancellationToken,
    ) -> ClassifyResult<PipelineOutput> {
        let files = collect_input_files(inputs)?;
        info!(files = files.len(), "Reading inputs");

        let mut read = ReadStats::default();
        let mut report = ReportBuilder::new();
        let mut partitions: Vec<MergePartition> = Vec::with_capacity(files.len());

        for path in &files {
            let (rows, stats) = read_input(path)?;
            read.rows += stats.rows;
            read.malformed_lines += stats.malformed_lines;
            read.files.push(stats);

            report.observe_input(path, &rows);
            partitions.push(self.merger.partition(rows));
        }

        info!(
            rows = read.rows,
            malformed_lines = read.malformed_lines,
            "Inputs read"
        );

        let merged = self.merger.finish(partitions);
        let classification = self
            .classify_merged(merged.entities, merged.stats, cancel)
            .await?;

        let canonical: Vec<&CanonicalEntity> = classification
            .entities
            .iter()
            .map(|classified| &classified.entity)
            .collect();
        let run_report = report.build(
            run_id,
            read.summary(),
            classification.merge,
            &canonical,
            classification.resolver,
            classification.label_counts.clone(),
        );

        Ok(PipelineOutput {
            run_id,
            classification,
            read,
            report: run_report,
        })
    }

    /// Merge, resolve and classify rows already in memory
    ///
    /// # Errors
    /// Resolver failure under the abort policy
    pub async fn classify_records(
        &self,
        records: Vec<RawRecord>,
        cancel: &CancellationToken,
    ) -> ClassifyResult<Classification> {
        let merged = self.merger.merge(records);
        self.classify_merged(merged.entities, merged.stats, cancel).await
    }

    async fn classify_merged(
        &self,
        entities: Vec<CanonicalEntity>,
        merge: MergeStats,
        cancel: &CancellationToken,
    ) -> ClassifyResult<Classification> {
        let places = self.scorer.policy().place_targets(&entities);
        let index = self.resolve_places(places, cancel).await?;

        let unresolved_places = index.unresolved().len();
        let mut label_counts: BTreeMap<AttributionLabel, usize> =
            AttributionLabel::ALL.iter().map(|label| (*label, 0)).collect();

        let classified: Vec<ClassifiedEntity> = entities
            .into_iter()
            .map(|entity| {
                let evidence = self.scorer.score(&entity, &index);
                let classified = annotate(entity, evidence, self.scorer.policy());
                *label_counts.entry(classified.attribution).or_default() += 1;
                classified
            })
            .collect();

        info!(
            entities = classified.len(),
            a = label_counts[&AttributionLabel::A],
            b = label_counts[&AttributionLabel::B],
            mixed = label_counts[&AttributionLabel::Mixed],
            other = label_counts[&AttributionLabel::Other],
            "Classification complete"
        );

        Ok(Classification {
            entities: classified,
            label_counts,
            merge,
            resolver: index.stats(),
            unresolved_places,
        })
    }

    async fn resolve_places(
        &self,
        places: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> ClassifyResult<PlaceCountryIndex> {
        if places.is_empty() {
            return Ok(PlaceCountryIndex::empty());
        }

        match self.resolver.resolve(places, cancel).await {
            Ok(index) => {
                if index.stats().cancelled && !index.unresolved().is_empty() {
                    warn!(
                        unresolved = index.unresolved().len(),
                        "Resolution cancelled, scoring with partial index"
                    );
                }
                Ok(index)
            }
            Err(e) => match self.on_failure {
                FailurePolicy::Abort => Err(e.into()),
                FailurePolicy::Continue => {
                    warn!(error = %e, "Resolver failed, continuing with partial place index");
                    let partial = e.into_partial();
                    warn!(
                        unresolved = partial.unresolved().len(),
                        "Places left unresolved; affected entities may score lower"
                    );
                    Ok(partial)
                }
            },
        }
    }
}

fn read_input(path: &Path) -> ClassifyResult<(Vec<RawRecord>, FileStats)> {
    let batch = read_jsonl::<RawRecord>(path)?;
    let stats = FileStats {
        path: path.to_path_buf(),
        rows: batch.rows.len(),
        malformed_lines: batch.malformed_lines,
    };
    Ok((batch.rows, stats))
}
