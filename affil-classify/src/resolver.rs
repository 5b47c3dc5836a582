//! Place-Country Resolver
//!
//! Builds the [`PlaceCountryIndex`] once per run from the deduplicated set of
//! place identifiers referenced by all canonical entities.
//!
//! # Implementation
//! - Places are sorted and cut into bounded batches (`batch_size`)
//! - Batches run concurrently up to `concurrency` (`buffer_unordered`)
//! - Each batch retries transient failures with exponential backoff plus jitter
//! - Fatal failures stop that batch immediately
//! - Results union into one map; accumulation order does not matter
//!
//! # Failure
//! Every batch is attempted. If any batch fails, the resolver returns
//! [`ResolveError::BatchFailed`] naming the first failed batch (lowest batch
//! index) and carrying the partial index built from every batch that did
//! succeed. The caller decides whether to continue with it.
//!
//! # Cancellation
//! Batches not yet started when the token fires are skipped and their places
//! recorded as unresolved; a cancelled run returns the partial index.

use crate::error::ConfigError;
use crate::graph::{GraphQuery, QueryError, MAX_CONTAINMENT_DEPTH};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static NO_COUNTRIES: BTreeSet<String> = BTreeSet::new();

// ============================================================================
// Index
// ============================================================================

/// Resolver run statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    /// Distinct places requested
    pub requested: usize,
    /// Places with at least one country
    pub resolved: usize,
    /// Places whose batch failed or was skipped
    pub unresolved: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub cancelled: bool,
}

/// Place -> countries lookup, immutable once built
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceCountryIndex {
    countries: BTreeMap<String, BTreeSet<String>>,
    unresolved: BTreeSet<String>,
    stats: ResolveStats,
}

impl PlaceCountryIndex {
    /// Empty index (no place resolves)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index from known entries, all considered resolved
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        let countries: BTreeMap<String, BTreeSet<String>> = entries
            .into_iter()
            .filter(|(_, set)| !set.is_empty())
            .collect();
        let stats = ResolveStats {
            requested: countries.len(),
            resolved: countries.len(),
            ..Default::default()
        };
        Self {
            countries,
            unresolved: BTreeSet::new(),
            stats,
        }
    }

    /// Countries of a place (empty for unknown places)
    pub fn lookup(&self, place: &str) -> &BTreeSet<String> {
        self.countries.get(place).unwrap_or(&NO_COUNTRIES)
    }

    /// Whether the place was requested but its batch never completed
    pub fn is_unresolved(&self, place: &str) -> bool {
        self.unresolved.contains(place)
    }

    pub fn unresolved(&self) -> &BTreeSet<String> {
        &self.unresolved
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Exponential backoff: `base * 2^(attempt-1)`, capped, plus up to `jitter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch, first try included
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(2000),
            max_backoff: Duration::from_millis(30_000),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempt` failed attempts (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Resolver settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    /// Containment hops before the country edge (at most 3)
    pub max_depth: u8,
    pub retry: RetryPolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            batch_size: 80,
            concurrency: 2,
            max_depth: MAX_CONTAINMENT_DEPTH,
            retry: RetryPolicy::default(),
        }
    }
}

impl ResolverSettings {
    /// # Errors
    /// Zero batch size, attempts or concurrency; depth above the supported bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroSetting("resolver.batch_size"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroSetting("resolver.concurrency"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroSetting("resolver.max_attempts"));
        }
        if self.max_depth > MAX_CONTAINMENT_DEPTH {
            return Err(ConfigError::DepthTooLarge {
                requested: self.max_depth,
                max: MAX_CONTAINMENT_DEPTH,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Resolver failure escalated to the caller
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A batch exhausted its retries or failed fatally
    #[error(
        "Place batch {index} ({} places) failed after {attempts} attempt(s), {failed_batches} batch(es) failed in total: {source}",
        .batch.len()
    )]
    BatchFailed {
        /// Position of the batch in the sorted batch list
        index: usize,
        /// Place identifiers of the failed batch
        batch: Vec<String>,
        attempts: u32,
        failed_batches: usize,
        source: QueryError,
        /// Index built from the batches that succeeded
        partial: PlaceCountryIndex,
    },
}

impl ResolveError {
    /// Partial index built before the failure was escalated
    pub fn into_partial(self) -> PlaceCountryIndex {
        match self {
            ResolveError::BatchFailed { partial, .. } => partial,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

enum BatchOutcome {
    Resolved {
        batch: Vec<String>,
        found: HashMap<String, BTreeSet<String>>,
    },
    Skipped {
        batch: Vec<String>,
    },
    Failed {
        index: usize,
        batch: Vec<String>,
        attempts: u32,
        error: QueryError,
    },
}

/// Place-Country Resolver
pub struct PlaceCountryResolver {
    graph: Arc<dyn GraphQuery>,
    settings: ResolverSettings,
}

impl PlaceCountryResolver {
    /// # Errors
    /// Invalid settings (see [`ResolverSettings::validate`])
    pub fn new(
        graph: Arc<dyn GraphQuery>,
        settings: ResolverSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { graph, settings })
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve places into an index
    ///
    /// # Arguments
    /// * `places` - Place identifiers (deduplicated and sorted here)
    /// * `cancel` - Checked before each batch and during backoff
    ///
    /// # Errors
    /// [`ResolveError::BatchFailed`] if any batch failed; it carries the partial index
    pub async fn resolve<I>(
        &self,
        places: I,
        cancel: &CancellationToken,
    ) -> Result<PlaceCountryIndex, ResolveError>
    where
        I: IntoIterator<Item = String>,
    {
        let places: BTreeSet<String> = places
            .into_iter()
            .filter(|place| !place.trim().is_empty())
            .collect();
        let places: Vec<String> = places.into_iter().collect();

        let batches: Vec<Vec<String>> = places
            .chunks(self.settings.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let total = batches.len();

        info!(
            graph = self.graph.name(),
            places = places.len(),
            batches = total,
            concurrency = self.settings.concurrency,
            max_depth = self.settings.max_depth,
            "Resolving place countries"
        );

        let outcomes: Vec<BatchOutcome> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.run_batch(index, total, batch, cancel))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut countries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut unresolved = BTreeSet::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome {
                BatchOutcome::Resolved { batch, found } => {
                    let requested: BTreeSet<&str> = batch.iter().map(String::as_str).collect();
                    for (place, set) in found {
                        if set.is_empty() || !requested.contains(place.as_str()) {
                            continue;
                        }
                        countries.entry(place).or_default().extend(set);
                    }
                }
                BatchOutcome::Skipped { batch } => unresolved.extend(batch),
                BatchOutcome::Failed {
                    index,
                    batch,
                    attempts,
                    error,
                } => {
                    unresolved.extend(batch.iter().cloned());
                    failures.push((index, batch, attempts, error));
                }
            }
        }

        let stats = ResolveStats {
            requested: places.len(),
            resolved: countries.len(),
            unresolved: unresolved.len(),
            batches: total,
            failed_batches: failures.len(),
            cancelled: cancel.is_cancelled(),
        };

        info!(
            requested = stats.requested,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            failed_batches = stats.failed_batches,
            cancelled = stats.cancelled,
            "Place resolution finished"
        );

        let index = PlaceCountryIndex {
            countries,
            unresolved,
            stats,
        };

        failures.sort_by_key(|(index, ..)| *index);
        let failed_batches = failures.len();
        match failures.into_iter().next() {
            None => Ok(index),
            Some((batch_index, batch, attempts, source)) => Err(ResolveError::BatchFailed {
                index: batch_index,
                batch,
                attempts,
                failed_batches,
                source,
                partial: index,
            }),
        }
    }

    async fn run_batch(
        &self,
        index: usize,
        total: usize,
        batch: Vec<String>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        if cancel.is_cancelled() {
            debug!(batch = index + 1, "Cancelled, skipping batch");
            return BatchOutcome::Skipped { batch };
        }

        let retry = &self.settings.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.graph.resolve(&batch, self.settings.max_depth).await {
                Ok(found) => {
                    debug!(
                        batch = index + 1,
                        total,
                        places = batch.len(),
                        resolved = found.len(),
                        attempt,
                        "Batch resolved"
                    );
                    return BatchOutcome::Resolved { batch, found };
                }
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        batch = index + 1,
                        total,
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch query failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(batch = index + 1, "Cancelled during backoff");
                            return BatchOutcome::Skipped { batch };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(
                        batch = index + 1,
                        total,
                        attempt,
                        first = batch.first().map(String::as_str).unwrap_or(""),
                        error = %e,
                        "Batch query failed"
                    );
                    return BatchOutcome::Failed {
                        index,
                        batch,
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }
}
