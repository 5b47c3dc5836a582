//! Error types for affil-classify
//!
//! - [`ConfigError`]: rejected before any entity is processed
//! - [`ClassifyError`]: pipeline-level failure (wraps config, resolver and I/O errors)
//!
//! Malformed input rows are not errors: they are counted and skipped
//! (see `MergeStats::missing_id` and `ReadStats::malformed_lines`).

use crate::resolver::ResolveError;
use thiserror::Error;

/// Invalid classifier configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Weight below zero
    #[error("Weight '{name}' must be >= 0, got {value}")]
    NegativeWeight { name: &'static str, value: i64 },

    /// Threshold of zero or below
    #[error("Other threshold must be > 0, got {0}")]
    NonPositiveThreshold(i64),

    /// Count setting that must be at least one (batch size, attempts, concurrency, ...)
    #[error("Setting '{0}' must be >= 1")]
    ZeroSetting(&'static str),

    /// Containment depth beyond the supported bound
    #[error("max_depth {requested} exceeds the supported maximum of {max}")]
    DepthTooLarge { requested: u8, max: u8 },

    /// Both affiliations name the same country
    #[error("Affiliations A and B share country id '{0}'")]
    DuplicateAffiliation(String),

    /// Required identifier or name left blank
    #[error("Setting '{0}' must not be empty")]
    EmptySetting(&'static str),

    /// Place relation missing from `relation_priority`
    #[error("Place relation '{0}' is not listed in relation_priority and would never be scored")]
    UnscoredPlaceRelation(String),

    /// Text pattern that does not compile
    #[error("Invalid text pattern '{pattern}' for language '{lang}': {source}")]
    InvalidPattern {
        lang: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Classification pipeline failure
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Resolver exhausted retries on at least one batch (abort policy)
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Shared error (I/O, JSON, TOML)
    #[error("Common error: {0}")]
    Common(#[from] affil_common::Error),
}

/// Result type for pipeline operations
pub type ClassifyResult<T> = Result<T, ClassifyError>;
