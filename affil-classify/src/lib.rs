//! affil-classify library
//!
//! Classifies knowledge-graph entities harvested from several sources into a
//! two-sided affiliation label (A, B, Mixed, Other) using weighted structured
//! and textual evidence.
//!
//! # Modules
//! - [`merger`]: union of harvested rows into canonical entities
//! - [`graph`], [`resolver`]: place -> country index built by bounded graph queries
//! - [`scorer`], [`patterns`]: structured and text evidence
//! - [`decider`]: score triple -> label
//! - [`pipeline`]: end-to-end orchestration
//! - [`config`], [`report`]: run configuration and run summary

pub mod config;
pub mod decider;
pub mod error;
pub mod graph;
pub mod merger;
pub mod patterns;
pub mod pipeline;
pub mod policy;
pub mod report;
pub mod resolver;
pub mod scorer;
pub mod types;

pub use config::{ClassifierConfig, FailurePolicy, RunSettings};
pub use error::{ClassifyError, ClassifyResult, ConfigError};
pub use pipeline::{ClassificationPipeline, PipelineOutput};
pub use types::{AttributionLabel, CanonicalEntity, ClassifiedEntity, RawRecord, ScoreTriple};
