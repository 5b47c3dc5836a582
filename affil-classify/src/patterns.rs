//! Text pattern library
//!
//! Keyword patterns per (bucket, language), matched case-insensitively against
//! labels, descriptions and aliases. `\b` is Unicode-aware, so Cyrillic
//! patterns anchor on word boundaries the same way Latin ones do.
//!
//! Stem patterns (`\bукраїн`) are open on the right and match inflected
//! forms; demonym and country-name patterns are closed.

use crate::error::ConfigError;
use crate::policy::UNTAGGED_OTHER;
use crate::types::Bucket;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One pattern entry (`[[scoring.patterns]]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub bucket: Bucket,
    pub lang: String,
    pub pattern: String,
    /// Third-party tag for Other patterns (e.g. "American")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Built-in patterns: (bucket, language, pattern, tag)
const DEFAULT_PATTERNS: &[(Bucket, &str, &str, Option<&str>)] = &[
    // Affiliation A
    (Bucket::A, "en", r"\brussian\b", None),
    (Bucket::A, "en", r"\brussia\b", None),
    (Bucket::A, "en", r"\brf\b", None),
    (Bucket::A, "en", r"\brussian[- ]backed\b", None),
    (Bucket::A, "ru", r"\bросси", None),
    (Bucket::A, "ru", r"\bрусск", None),
    (Bucket::A, "ru", r"\bрф\b", None),
    (Bucket::A, "uk", r"\bросі", None),
    (Bucket::A, "uk", r"\bросійськ", None),
    (Bucket::A, "uk", r"\bрф\b", None),
    // Affiliation B
    (Bucket::B, "en", r"\bukrain", None),
    (Bucket::B, "en", r"\bukraine\b", None),
    (Bucket::B, "ru", r"\bукраин", None),
    (Bucket::B, "ru", r"\bукраинец", None),
    (Bucket::B, "ru", r"\bукраинка", None),
    (Bucket::B, "uk", r"\bукраїн", None),
    (Bucket::B, "uk", r"\bукраїнець", None),
    (Bucket::B, "uk", r"\bукраїнка", None),
    // Third parties
    (Bucket::Other, "en", r"\bamerican\b", Some("American")),
    (Bucket::Other, "en", r"\bu\.?s\.?\b", Some("American")),
    (Bucket::Other, "en", r"\bunited states\b", Some("American")),
    (Bucket::Other, "ru", r"\bамерикан", Some("American")),
    (Bucket::Other, "uk", r"\bамерикан", Some("American")),
    (Bucket::Other, "en", r"\bchinese\b", Some("Chinese")),
    (Bucket::Other, "en", r"\bchina\b", Some("Chinese")),
    (Bucket::Other, "en", r"\bprc\b", Some("Chinese")),
    (Bucket::Other, "ru", r"\bкита", Some("Chinese")),
    (Bucket::Other, "ru", r"\bкнр\b", Some("Chinese")),
    (Bucket::Other, "uk", r"\bкита", Some("Chinese")),
    (Bucket::Other, "uk", r"\bкнр\b", Some("Chinese")),
];

/// Built-in pattern table as owned specs
pub fn default_pattern_specs() -> Vec<PatternSpec> {
    DEFAULT_PATTERNS
        .iter()
        .map(|(bucket, lang, pattern, tag)| PatternSpec {
            bucket: *bucket,
            lang: lang.to_string(),
            pattern: pattern.to_string(),
            tag: tag.map(str::to_string),
        })
        .collect()
}

/// Compiled pattern
#[derive(Debug, Clone)]
pub struct TextPattern {
    pub bucket: Bucket,
    pub pattern: String,
    /// Tag for Other patterns (untagged Other patterns get "other")
    pub tag: Option<String>,
    regex: Regex,
}

impl TextPattern {
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Compiled pattern library, grouped by language in table order
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    by_lang: BTreeMap<String, Vec<TextPattern>>,
}

impl PatternLibrary {
    /// Compile pattern specs (once per run)
    ///
    /// # Errors
    /// [`ConfigError::InvalidPattern`] for the first pattern that does not compile
    pub fn compile(specs: &[PatternSpec]) -> Result<Self, ConfigError> {
        let mut by_lang: BTreeMap<String, Vec<TextPattern>> = BTreeMap::new();

        for spec in specs {
            let regex = RegexBuilder::new(&spec.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| ConfigError::InvalidPattern {
                    lang: spec.lang.clone(),
                    pattern: spec.pattern.clone(),
                    source,
                })?;

            let tag = match spec.bucket {
                Bucket::Other => Some(
                    spec.tag
                        .clone()
                        .unwrap_or_else(|| UNTAGGED_OTHER.to_string()),
                ),
                Bucket::A | Bucket::B => None,
            };

            by_lang
                .entry(spec.lang.clone())
                .or_default()
                .push(TextPattern {
                    bucket: spec.bucket,
                    pattern: spec.pattern.clone(),
                    tag,
                    regex,
                });
        }

        debug!(
            languages = by_lang.len(),
            patterns = specs.len(),
            "Pattern library compiled"
        );
        Ok(Self { by_lang })
    }

    /// Compile the built-in table
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::compile(&default_pattern_specs())
    }

    /// Patterns for one language (empty if the language is not covered)
    pub fn patterns_for(&self, lang: &str) -> &[TextPattern] {
        self.by_lang.get(lang).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Patterns of `lang` matching `text`, in table order (each at most once)
    pub fn matches<'a>(
        &'a self,
        lang: &str,
        text: &'a str,
    ) -> impl Iterator<Item = &'a TextPattern> + 'a {
        self.patterns_for(lang)
            .iter()
            .filter(move |pattern| pattern.is_match(text))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.by_lang.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_lang.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_lang.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(library: &PatternLibrary, lang: &str, text: &str) -> Vec<String> {
        library
            .matches(lang, text)
            .map(|p| p.pattern.clone())
            .collect()
    }

    #[test]
    fn test_builtin_covers_three_languages() {
        let library = PatternLibrary::builtin().unwrap();
        let languages: Vec<&str> = library.languages().collect();
        assert_eq!(languages, vec!["en", "ru", "uk"]);
        assert_eq!(library.len(), DEFAULT_PATTERNS.len());
    }

    #[test]
    fn test_case_insensitive_word_boundary() {
        let library = PatternLibrary::builtin().unwrap();
        assert_eq!(
            matched(&library, "en", "A journalist from RUSSIA"),
            vec![r"\brussia\b".to_string()]
        );
        // "prussia" does not contain the word "russia"
        assert!(matched(&library, "en", "Kingdom of Prussia").is_empty());
    }

    #[test]
    fn test_cyrillic_stems_match_inflections() {
        let library = PatternLibrary::builtin().unwrap();
        let hits = matched(&library, "uk", "Українська журналістка");
        assert_eq!(hits, vec![r"\bукраїн".to_string()]);

        let hits = matched(&library, "ru", "политик Российской Федерации");
        assert_eq!(hits, vec![r"\bросси".to_string()]);
    }

    #[test]
    fn test_uncovered_language_has_no_patterns() {
        let library = PatternLibrary::builtin().unwrap();
        assert!(library.patterns_for("de").is_empty());
        assert_eq!(library.matches("de", "russischer Journalist").count(), 0);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let specs = vec![PatternSpec {
            bucket: Bucket::A,
            lang: "en".to_string(),
            pattern: r"\b(russia".to_string(),
            tag: None,
        }];
        assert!(matches!(
            PatternLibrary::compile(&specs),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_untagged_other_gets_default_tag() {
        let specs = vec![PatternSpec {
            bucket: Bucket::Other,
            lang: "en".to_string(),
            pattern: r"\bgerman\b".to_string(),
            tag: None,
        }];
        let library = PatternLibrary::compile(&specs).unwrap();
        assert_eq!(library.patterns_for("en")[0].tag.as_deref(), Some("other"));
    }
}
