//! Classifier configuration
//!
//! TOML file discovered by `affil_common::config` (CLI > `AFFIL_CONFIG` >
//! `~/.config/affil/config.toml` > compiled defaults). Every key has a compiled
//! default, so an empty file is valid.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [merge]
//! source_precedence = ["wikidata_sparql", "wikipedia_navboxes"]
//!
//! [scoring]
//! threshold = 4
//! hits_cap = 200
//!
//! [scoring.weights]
//! strong = 4
//! medium = 2
//! weak = 1
//!
//! [scoring.other_countries]
//! Q30 = "American"
//!
//! [resolver]
//! batch_size = 80
//! max_attempts = 3
//! max_depth = 3
//! on_failure = "abort"
//! ```
//!
//! [`ClassifierConfig::validate`] turns the raw file into [`RunSettings`] and
//! rejects bad values before any entity is processed.

use crate::error::ConfigError;
use crate::graph::{sparql::DEFAULT_ENDPOINT, SparqlConfig, MAX_CONTAINMENT_DEPTH};
use crate::merger::SourcePrecedence;
use crate::patterns::{default_pattern_specs, PatternLibrary, PatternSpec};
use crate::policy::{
    Affiliation, ScoringPolicy, DEFAULT_HITS_CAP, DEFAULT_OTHER_COUNTRIES,
    DEFAULT_PLACE_RELATIONS, DEFAULT_RELATION_PRIORITY, DEFAULT_THRESHOLD,
};
use crate::resolver::{ResolverSettings, RetryPolicy};
use crate::types::Weights;
use affil_common::config::{load_config, resolve_config_path};
use affil_common::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// What to do when the resolver cannot resolve every batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run; no output is written
    #[default]
    Abort,
    /// Score with the partial index and warn
    Continue,
}

// ============================================================================
// Raw configuration (TOML)
// ============================================================================

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub logging: LoggingConfig,
    pub merge: MergeConfig,
    pub scoring: ScoringConfig,
    pub resolver: ResolverConfig,
}

/// `[merge]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Source types in precedence order (first wins scalar fields)
    pub source_precedence: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            source_precedence: vec![
                "wikidata_sparql".to_string(),
                "wikipedia_navboxes".to_string(),
            ],
        }
    }
}

/// `[scoring.weights]` (signed so negative values are reported, not rejected by the parser)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub strong: i64,
    pub medium: i64,
    pub weak: i64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        let weights = Weights::default();
        Self {
            strong: i64::from(weights.strong),
            medium: i64::from(weights.medium),
            weak: i64::from(weights.weak),
        }
    }
}

/// `[scoring.affiliation_a]` / `[scoring.affiliation_b]`
///
/// A blank `name` or `code` falls back to the country id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationConfig {
    pub country: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
}

impl From<Affiliation> for AffiliationConfig {
    fn from(affiliation: Affiliation) -> Self {
        Self {
            country: affiliation.country,
            name: affiliation.name,
            code: affiliation.code,
        }
    }
}

/// `[scoring]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub threshold: i64,
    pub hits_cap: usize,
    pub weights: WeightsConfig,
    pub affiliation_a: AffiliationConfig,
    pub affiliation_b: AffiliationConfig,
    pub mixed_name: String,
    pub other_name: String,
    /// Third-party allow-list: country id -> tag
    pub other_countries: BTreeMap<String, String>,
    pub relation_priority: Vec<String>,
    pub place_relations: Vec<String>,
    /// Replaces the built-in pattern table when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<PatternSpec>>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let policy = ScoringPolicy::default();
        Self {
            threshold: i64::from(DEFAULT_THRESHOLD),
            hits_cap: DEFAULT_HITS_CAP,
            weights: WeightsConfig::default(),
            affiliation_a: policy.affiliation_a.into(),
            affiliation_b: policy.affiliation_b.into(),
            mixed_name: policy.mixed_name,
            other_name: policy.other_name,
            other_countries: DEFAULT_OTHER_COUNTRIES
                .iter()
                .map(|(id, tag)| (id.to_string(), tag.to_string()))
                .collect(),
            relation_priority: DEFAULT_RELATION_PRIORITY
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            place_relations: DEFAULT_PLACE_RELATIONS
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            patterns: None,
        }
    }
}

/// `[resolver]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub concurrency: usize,
    pub max_depth: u8,
    pub on_failure: FailurePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let sparql = SparqlConfig::default();
        let settings = ResolverSettings::default();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: sparql.user_agent,
            timeout_secs: sparql.timeout.as_secs(),
            requests_per_second: sparql.requests_per_second,
            batch_size: settings.batch_size,
            max_attempts: settings.retry.max_attempts,
            base_backoff_ms: settings.retry.base_backoff.as_millis() as u64,
            max_backoff_ms: settings.retry.max_backoff.as_millis() as u64,
            jitter_ms: settings.retry.jitter.as_millis() as u64,
            concurrency: settings.concurrency,
            max_depth: MAX_CONTAINMENT_DEPTH,
            on_failure: FailurePolicy::Abort,
        }
    }
}

// ============================================================================
// Validated settings
// ============================================================================

/// Everything a run needs, validated
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub policy: ScoringPolicy,
    pub patterns: PatternLibrary,
    pub precedence: SourcePrecedence,
    pub resolver: ResolverSettings,
    pub sparql: SparqlConfig,
    pub on_failure: FailurePolicy,
}

fn weight(name: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value < 0 {
        return Err(ConfigError::NegativeWeight { name, value });
    }
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

fn affiliation(
    config: &AffiliationConfig,
    field: &'static str,
) -> Result<Affiliation, ConfigError> {
    let country = config.country.trim();
    if country.is_empty() {
        return Err(ConfigError::EmptySetting(field));
    }
    let or_country = |value: &str| match value.trim() {
        "" => country.to_string(),
        value => value.to_string(),
    };
    Ok(Affiliation {
        country: country.to_string(),
        name: or_country(&config.name),
        code: or_country(&config.code),
    })
}

/// Keep the first occurrence of each entry
fn dedupe(items: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

impl ClassifierConfig {
    /// Discover and load the configuration file
    ///
    /// # Errors
    /// Explicitly named file missing or unreadable; invalid TOML
    pub fn load(cli_path: Option<&Path>) -> affil_common::Result<Self> {
        load_config(&resolve_config_path(cli_path))
    }

    /// Validate and build run settings
    ///
    /// # Errors
    /// Negative weight, threshold <= 0, zero batch size/attempts/concurrency/rate,
    /// depth above 3, A and B sharing a country, an invalid pattern
    pub fn validate(&self) -> Result<RunSettings, ConfigError> {
        let scoring = &self.scoring;

        let weights = Weights {
            strong: weight("strong", scoring.weights.strong)?,
            medium: weight("medium", scoring.weights.medium)?,
            weak: weight("weak", scoring.weights.weak)?,
        };

        if scoring.threshold <= 0 {
            return Err(ConfigError::NonPositiveThreshold(scoring.threshold));
        }
        let threshold = u32::try_from(scoring.threshold).unwrap_or(u32::MAX);

        let affiliation_a = affiliation(&scoring.affiliation_a, "scoring.affiliation_a.country")?;
        let affiliation_b = affiliation(&scoring.affiliation_b, "scoring.affiliation_b.country")?;
        if affiliation_a.country == affiliation_b.country {
            return Err(ConfigError::DuplicateAffiliation(affiliation_a.country));
        }

        // A and B take precedence over an allow-list entry naming the same id
        let other_countries = scoring
            .other_countries
            .iter()
            .filter(|(id, _)| **id != affiliation_a.country && **id != affiliation_b.country)
            .map(|(id, tag)| (id.clone(), tag.clone()))
            .collect();

        // Place relations are only scored when listed in the priority order
        let relation_priority = dedupe(&scoring.relation_priority);
        if let Some(kind) = scoring
            .place_relations
            .iter()
            .find(|kind| !relation_priority.contains(*kind))
        {
            return Err(ConfigError::UnscoredPlaceRelation(kind.clone()));
        }

        let policy = ScoringPolicy {
            affiliation_a,
            affiliation_b,
            other_countries,
            relation_priority,
            place_relations: scoring.place_relations.iter().cloned().collect(),
            weights,
            threshold,
            hits_cap: scoring.hits_cap,
            mixed_name: scoring.mixed_name.clone(),
            other_name: scoring.other_name.clone(),
        };

        let patterns = match &scoring.patterns {
            Some(specs) => PatternLibrary::compile(specs)?,
            None => PatternLibrary::compile(&default_pattern_specs())?,
        };

        let resolver_config = &self.resolver;
        let resolver = ResolverSettings {
            batch_size: resolver_config.batch_size,
            concurrency: resolver_config.concurrency,
            max_depth: resolver_config.max_depth,
            retry: RetryPolicy {
                max_attempts: resolver_config.max_attempts,
                base_backoff: Duration::from_millis(resolver_config.base_backoff_ms),
                max_backoff: Duration::from_millis(resolver_config.max_backoff_ms),
                jitter: Duration::from_millis(resolver_config.jitter_ms),
            },
        };
        resolver.validate()?;

        if resolver_config.requests_per_second == 0 {
            return Err(ConfigError::ZeroSetting("resolver.requests_per_second"));
        }
        if resolver_config.timeout_secs == 0 {
            return Err(ConfigError::ZeroSetting("resolver.timeout_secs"));
        }
        if resolver_config.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptySetting("resolver.endpoint"));
        }

        let sparql = SparqlConfig {
            endpoint: resolver_config.endpoint.clone(),
            user_agent: resolver_config.user_agent.clone(),
            timeout: Duration::from_secs(resolver_config.timeout_secs),
            requests_per_second: resolver_config.requests_per_second,
            ..SparqlConfig::default()
        };

        Ok(RunSettings {
            policy,
            patterns,
            precedence: SourcePrecedence::new(self.merge.source_precedence.clone()),
            resolver,
            sparql,
            on_failure: resolver_config.on_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affil_common::config::parse_config;

    #[test]
    fn test_defaults_validate() {
        let settings = ClassifierConfig::default().validate().unwrap();
        assert_eq!(settings.policy, ScoringPolicy::default());
        assert_eq!(settings.resolver, ResolverSettings::default());
        assert_eq!(settings.on_failure, FailurePolicy::Abort);
        assert_eq!(settings.precedence.rank(Some("wikidata_sparql")), 0);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config: ClassifierConfig = parse_config("").unwrap();
        assert_eq!(config, ClassifierConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: ClassifierConfig = parse_config(
            r#"
            [scoring]
            threshold = 6

            [scoring.weights]
            weak = 0

            [resolver]
            on_failure = "continue"
            "#,
        )
        .unwrap();

        let settings = config.validate().unwrap();
        assert_eq!(settings.policy.threshold, 6);
        assert_eq!(settings.policy.weights.weak, 0);
        assert_eq!(settings.policy.weights.strong, 4);
        assert_eq!(settings.on_failure, FailurePolicy::Continue);
        assert_eq!(settings.resolver.batch_size, 80);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = ClassifierConfig::default();
        config.scoring.weights.medium = -2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeWeight { name: "medium", value: -2 })
        ));
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let mut config = ClassifierConfig::default();
        config.scoring.threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveThreshold(0))
        ));
    }

    #[test]
    fn test_same_country_for_both_affiliations_rejected() {
        let mut config = ClassifierConfig::default();
        config.scoring.affiliation_b.country = "Q159".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAffiliation(_))
        ));
    }

    #[test]
    fn test_affiliation_name_and_code_default_to_country() {
        let config: ClassifierConfig = parse_config(
            r#"
            [scoring.affiliation_a]
            country = "Q7"
            "#,
        )
        .unwrap();

        let settings = config.validate().unwrap();
        let a = &settings.policy.affiliation_a;
        assert_eq!(a.country, "Q7");
        assert_eq!(a.name, "Q7");
        assert_eq!(a.code, "Q7");
        assert_eq!(settings.policy.affiliation_b.country, "Q212");
        assert_eq!(settings.policy.affiliation_b.code, "UA");
    }

    #[test]
    fn test_place_relation_outside_priority_rejected() {
        let mut config = ClassifierConfig::default();
        config.scoring.place_relations.push("P937".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnscoredPlaceRelation(kind)) if kind == "P937"
        ));

        config.scoring.relation_priority.push("P937".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_depth_above_three_rejected() {
        let mut config = ClassifierConfig::default();
        config.resolver.max_depth = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DepthTooLarge { requested: 5, .. })
        ));
    }

    #[test]
    fn test_pattern_override_from_toml() {
        let config: ClassifierConfig = parse_config(
            r#"
            [[scoring.patterns]]
            bucket = "Other"
            lang = "de"
            pattern = '\bdeutsch'
            tag = "German"
            "#,
        )
        .unwrap();

        let settings = config.validate().unwrap();
        assert_eq!(settings.patterns.len(), 1);
        assert_eq!(settings.patterns.patterns_for("de").len(), 1);
        assert!(settings.patterns.patterns_for("en").is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = ClassifierConfig::default();
        config.scoring.patterns = Some(vec![PatternSpec {
            bucket: crate::types::Bucket::B,
            lang: "en".to_string(),
            pattern: "([".to_string(),
            tag: None,
        }]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
