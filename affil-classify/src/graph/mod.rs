//! Graph-query collaborators
//!
//! The resolver talks to the knowledge graph only through [`GraphQuery`].
//!
//! # Implementations
//! - [`SparqlGraph`]: live SPARQL endpoint (rate limited)
//! - [`MemoryGraph`]: in-memory edges, loadable from a JSON snapshot (offline runs, tests)

pub mod memory;
pub mod sparql;

pub use memory::{GraphSnapshot, MemoryGraph};
pub use sparql::{SparqlConfig, SparqlGraph};

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Largest containment depth a query may ask for
pub const MAX_CONTAINMENT_DEPTH: u8 = 3;

/// Graph-query failure, classified for the retry loop
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Timeouts, connection resets, rate limiting, server errors: worth retrying
    #[error("Transient query failure: {0}")]
    Transient(String),

    /// Rejected query or unreadable response: retrying will not help
    #[error("Fatal query failure: {0}")]
    Fatal(String),
}

impl QueryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Transient(_))
    }
}

/// Place-to-country lookup against a knowledge graph
///
/// For each place, the result holds every country reachable by at most
/// `max_depth` containment hops followed by one country edge (depth 0 being
/// the place's own country edge). Places with no reachable country may be
/// absent from the map or map to an empty set.
#[async_trait]
pub trait GraphQuery: Send + Sync {
    /// Resolve one batch of place identifiers
    ///
    /// # Errors
    /// [`QueryError::Transient`] or [`QueryError::Fatal`], per failure class
    async fn resolve(
        &self,
        batch: &[String],
        max_depth: u8,
    ) -> Result<HashMap<String, BTreeSet<String>>, QueryError>;

    /// Short name for logs and reports
    fn name(&self) -> &str;
}
