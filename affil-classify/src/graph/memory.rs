//! In-memory graph
//!
//! Holds `country` and `contained_in` edges and performs the same bounded
//! traversal the SPARQL query expresses. Snapshot format:
//!
//! ```json
//! {
//!   "country":      {"Q649": ["Q159"]},
//!   "contained_in": {"Q1899": ["Q2565"], "Q2565": ["Q212"]}
//! }
//! ```

use super::{GraphQuery, QueryError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

/// Serialized edge lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// place -> countries (depth 0 edge)
    #[serde(default)]
    pub country: BTreeMap<String, BTreeSet<String>>,
    /// place -> containing places (one containment hop)
    #[serde(default)]
    pub contained_in: BTreeMap<String, BTreeSet<String>>,
}

/// Graph held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    snapshot: GraphSnapshot,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        Self { snapshot }
    }

    /// Load a JSON snapshot
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not a snapshot
    pub fn load(path: &Path) -> affil_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            country_edges = snapshot.country.values().map(BTreeSet::len).sum::<usize>(),
            containment_edges = snapshot.contained_in.values().map(BTreeSet::len).sum::<usize>(),
            "Graph snapshot loaded"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Add a country edge
    pub fn with_country(mut self, place: &str, country: &str) -> Self {
        self.snapshot
            .country
            .entry(place.to_string())
            .or_default()
            .insert(country.to_string());
        self
    }

    /// Add a containment edge (`child` lies within `parent`)
    pub fn with_containment(mut self, child: &str, parent: &str) -> Self {
        self.snapshot
            .contained_in
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        self
    }

    /// Countries reachable in at most `max_depth` containment hops plus one country edge
    pub fn countries_within(&self, place: &str, max_depth: u8) -> BTreeSet<String> {
        let mut countries = BTreeSet::new();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut frontier: Vec<&str> = vec![place];

        for depth in 0..=max_depth {
            let mut next = Vec::new();
            for node in frontier {
                if !visited.insert(node) {
                    continue;
                }
                if let Some(found) = self.snapshot.country.get(node) {
                    countries.extend(found.iter().cloned());
                }
                if depth < max_depth {
                    if let Some(parents) = self.snapshot.contained_in.get(node) {
                        next.extend(parents.iter().map(String::as_str));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        countries
    }
}

#[async_trait]
impl GraphQuery for MemoryGraph {
    async fn resolve(
        &self,
        batch: &[String],
        max_depth: u8,
    ) -> Result<HashMap<String, BTreeSet<String>>, QueryError> {
        Ok(batch
            .iter()
            .filter_map(|place| {
                let countries = self.countries_within(place, max_depth);
                (!countries.is_empty()).then(|| (place.clone(), countries))
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// district -> city -> region -> state -> country, each one hop deeper
    fn chain() -> MemoryGraph {
        MemoryGraph::new()
            .with_containment("D", "C")
            .with_containment("C", "R")
            .with_containment("R", "S")
            .with_containment("S", "X")
            .with_country("X", "Q159")
            .with_country("S", "Q212")
    }

    #[test]
    fn test_depth_zero_is_direct_country_edge() {
        let graph = MemoryGraph::new().with_country("Q649", "Q159");
        assert_eq!(
            graph.countries_within("Q649", 0),
            BTreeSet::from(["Q159".to_string()])
        );
    }

    #[test]
    fn test_traversal_stops_at_max_depth() {
        let graph = chain();
        // S is three hops above D and carries a country edge
        assert!(graph.countries_within("D", 2).is_empty());
        assert_eq!(
            graph.countries_within("D", 3),
            BTreeSet::from(["Q212".to_string()])
        );
        // X is four hops above D but three above C
        assert_eq!(graph.countries_within("C", 3).len(), 2);
    }

    #[test]
    fn test_cycles_terminate() {
        let graph = MemoryGraph::new()
            .with_containment("A", "B")
            .with_containment("B", "A")
            .with_country("B", "Q159");
        assert_eq!(graph.countries_within("A", 3).len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_omits_places_without_country() {
        let graph = MemoryGraph::new().with_country("Q649", "Q159");
        let batch = vec!["Q649".to_string(), "Q0".to_string()];

        let resolved = graph.resolve(&batch, 3).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved["Q649"].contains("Q159"));
    }

    #[test]
    fn test_snapshot_roundtrip_from_json() {
        let json = r#"{"country":{"Q649":["Q159"]},"contained_in":{"Q1":["Q649"]}}"#;
        let snapshot: GraphSnapshot = serde_json::from_str(json).unwrap();
        let graph = MemoryGraph::from_snapshot(snapshot);
        assert!(graph.countries_within("Q1", 1).contains("Q159"));
    }
}
