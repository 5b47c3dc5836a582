//! SPARQL graph client
//!
//! Resolves place countries against a SPARQL endpoint (Wikidata by default).
//!
//! # Query Shape
//! One `VALUES` block per batch and one `UNION` branch per depth:
//! depth 0 is `?place <country> ?country`, depth `d` walks `d` containment
//! edges before the country edge. Unbounded property paths (`P131*`) are never
//! emitted; they time out on the public endpoint.
//!
//! # Failure Classification
//! - Transient: timeouts, connection errors, HTTP 408/429/5xx, truncated bodies
//! - Fatal: other HTTP 4xx, responses that are not SPARQL JSON
//!
//! # Rate Limiting
//! Token bucket (`governor`), `requests_per_second` permits shared by all batches.

use super::{GraphQuery, QueryError};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Public Wikidata query service
pub const DEFAULT_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Entity namespace used in `VALUES` and stripped from result URIs
const ENTITY_PREFIX: &str = "http://www.wikidata.org/entity/";

/// Connection settings for [`SparqlGraph`]
#[derive(Debug, Clone, PartialEq)]
pub struct SparqlConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub requests_per_second: u32,
    /// Containment relation walked between the place and its country edge
    pub containment_relation: String,
    /// Country relation closing every path
    pub country_relation: String,
}

impl Default for SparqlConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: concat!(
                "affil-classify/",
                env!("CARGO_PKG_VERSION"),
                " (affiliation research)"
            )
            .to_string(),
            timeout: Duration::from_secs(120),
            requests_per_second: 5,
            containment_relation: "P131".to_string(),
            country_relation: "P17".to_string(),
        }
    }
}

/// SPARQL JSON results format (only the parts read here)
#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

/// SPARQL endpoint client
pub struct SparqlGraph {
    client: Client,
    config: SparqlConfig,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SparqlGraph {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built (invalid user agent, TLS backend)
    pub fn new(config: SparqlConfig) -> affil_common::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/sparql-results+json"),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| affil_common::Error::Internal(format!("HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &SparqlConfig {
        &self.config
    }
}

/// Whether an identifier can be inlined as `wd:<id>` without escaping
fn is_plain_identifier(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Build the bounded UNION query for one batch
///
/// Identifiers that are not plain alphanumeric are left out of the query.
pub fn build_query(
    batch: &[String],
    max_depth: u8,
    containment_relation: &str,
    country_relation: &str,
) -> String {
    let values: Vec<String> = batch
        .iter()
        .filter(|id| is_plain_identifier(id))
        .map(|id| format!("wd:{}", id))
        .collect();

    let mut branches = Vec::with_capacity(usize::from(max_depth) + 1);
    for depth in 0..=max_depth {
        let mut branch = String::new();
        let mut subject = "?place".to_string();
        for hop in 1..=depth {
            let object = format!("?a{}", hop);
            let _ = writeln!(
                branch,
                "    {} wdt:{} {} .",
                subject, containment_relation, object
            );
            subject = object;
        }
        let _ = writeln!(
            branch,
            "    {} wdt:{} ?country .",
            subject, country_relation
        );
        branches.push(format!("  {{\n{}  }}", branch));
    }

    format!(
        "PREFIX wd: <{prefix}>\n\
         PREFIX wdt: <http://www.wikidata.org/prop/direct/>\n\
         \n\
         SELECT ?place ?country WHERE {{\n  \
         VALUES ?place {{ {values} }}\n\
         {branches}\n\
         }}\n",
        prefix = ENTITY_PREFIX,
        values = values.join(" "),
        branches = branches.join("\n  UNION\n"),
    )
}

/// Last path segment of an entity URI ("http://.../entity/Q1" -> "Q1")
fn strip_entity_uri(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Fold SPARQL JSON bindings into place -> countries
fn parse_bindings(body: &str) -> Result<HashMap<String, BTreeSet<String>>, QueryError> {
    let response: SparqlResponse = serde_json::from_str(body)
        .map_err(|e| QueryError::Fatal(format!("Unreadable SPARQL response: {}", e)))?;

    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();
    for binding in response.results.bindings {
        let (Some(place), Some(country)) = (binding.get("place"), binding.get("country")) else {
            continue;
        };
        out.entry(strip_entity_uri(&place.value).to_string())
            .or_default()
            .insert(strip_entity_uri(&country.value).to_string());
    }
    Ok(out)
}

fn classify_status(status: StatusCode) -> Option<QueryError> {
    if status.is_success() {
        return None;
    }
    let message = format!("SPARQL endpoint returned {}", status);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Some(QueryError::Transient(message))
    } else {
        Some(QueryError::Fatal(message))
    }
}

fn classify_send_error(error: reqwest::Error) -> QueryError {
    if error.is_builder() {
        QueryError::Fatal(format!("SPARQL request rejected: {}", error))
    } else {
        QueryError::Transient(format!("SPARQL request failed: {}", error))
    }
}

#[async_trait]
impl GraphQuery for SparqlGraph {
    async fn resolve(
        &self,
        batch: &[String],
        max_depth: u8,
    ) -> Result<HashMap<String, BTreeSet<String>>, QueryError> {
        if !batch.iter().any(|id| is_plain_identifier(id)) {
            return Ok(HashMap::new());
        }

        let query = build_query(
            batch,
            max_depth,
            &self.config.containment_relation,
            &self.config.country_relation,
        );

        self.rate_limiter.until_ready().await;

        debug!(
            endpoint = %self.config.endpoint,
            places = batch.len(),
            max_depth,
            "Querying SPARQL endpoint"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .form(&[("query", query.as_str())])
            .send()
            .await
            .map_err(classify_send_error)?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        let body = response
            .text()
            .await
            .map_err(|e| QueryError::Transient(format!("SPARQL body read failed: {}", e)))?;

        parse_bindings(&body)
    }

    fn name(&self) -> &str {
        "sparql"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_has_one_branch_per_depth() {
        let batch = vec!["Q649".to_string(), "Q1899".to_string()];
        let query = build_query(&batch, 3, "P131", "P17");

        assert!(query.contains("VALUES ?place { wd:Q649 wd:Q1899 }"));
        assert_eq!(query.matches("UNION").count(), 3);
        assert!(query.contains("?a3 wdt:P17 ?country"));
        assert!(!query.contains("?a4"));
        assert!(!query.contains("P131*"));
    }

    #[test]
    fn test_query_depth_zero_is_direct_country_only() {
        let query = build_query(&["Q1".to_string()], 0, "P131", "P17");
        assert!(!query.contains("UNION"));
        assert!(!query.contains("P131"));
        assert!(query.contains("?place wdt:P17 ?country"));
    }

    #[test]
    fn test_query_skips_identifiers_needing_escape() {
        let batch = vec!["Q1".to_string(), "Q2 } DROP".to_string()];
        let query = build_query(&batch, 1, "P131", "P17");
        assert!(query.contains("{ wd:Q1 }"));
        assert!(!query.contains("DROP"));
    }

    #[test]
    fn test_parse_bindings_strips_uris() {
        let body = r#"{"head":{"vars":["place","country"]},"results":{"bindings":[
            {"place":{"type":"uri","value":"http://www.wikidata.org/entity/Q649"},
             "country":{"type":"uri","value":"http://www.wikidata.org/entity/Q159"}},
            {"place":{"type":"uri","value":"http://www.wikidata.org/entity/Q649"},
             "country":{"type":"uri","value":"http://www.wikidata.org/entity/Q15180"}},
            {"place":{"type":"uri","value":"http://www.wikidata.org/entity/Q1"}}
        ]}}"#;

        let parsed = parse_bindings(body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["Q649"].len(), 2);
        assert!(parsed["Q649"].contains("Q159"));
    }

    #[test]
    fn test_unreadable_body_is_fatal() {
        let result = parse_bindings("<html>504 Gateway Time-out</html>");
        assert!(matches!(result, Err(QueryError::Fatal(_))));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(classify_status(StatusCode::GATEWAY_TIMEOUT)
            .unwrap()
            .is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap()
            .is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST)
            .unwrap()
            .is_transient());
    }
}
