//! Entity and fact extraction contract.
//!
//! The generation component implements [`Extractor`]; the orchestrator only
//! ever consumes it through this trait. Two local implementations cover the
//! cases where no generative model is available:
//!
//! - [`HeuristicExtractor`] pulls capitalized word runs (as `PERSON`) and
//!   URLs (as `URL`) out of the text and never produces facts.
//! - [`SuppliedExtractor`] replays results the generation component already
//!   produced (e.g. its JSON reply), falling back to the heuristics for
//!   whatever was not supplied.

use std::collections::HashSet;
use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use sigma_types::error::ExtractionError;
use sigma_types::memory::{ExtractedEntity, ExtractedFact};

/// Most entities the heuristic extractor returns for one text.
const HEURISTIC_ENTITY_LIMIT: usize = 5;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b").expect("name pattern is valid")
});

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("url pattern is valid"));

/// Contract for pulling entities and facts out of free text.
///
/// Implementations may return empty lists. Errors are treated by callers as
/// "no results", never as fatal.
pub trait Extractor: Send + Sync {
    fn extract_entities(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vec<ExtractedEntity>, ExtractionError>> + Send;

    fn extract_facts(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<Vec<ExtractedFact>, ExtractionError>> + Send;
}

/// Extractor used when no collaborator is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    async fn extract_entities(&self, _text: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        Ok(Vec::new())
    }

    async fn extract_facts(&self, _text: &str) -> Result<Vec<ExtractedFact>, ExtractionError> {
        Ok(Vec::new())
    }
}

/// Regex fallback: capitalized word runs become `PERSON`, URLs become `URL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`Extractor::extract_entities`].
    pub fn entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let names = NAME_PATTERN
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|name| name.chars().count() > 2)
            .map(|name| ExtractedEntity::new(name, "PERSON"));
        let urls = URL_PATTERN
            .find_iter(text)
            .map(|m| ExtractedEntity::new(m.as_str(), "URL"));

        let mut seen = HashSet::new();
        names
            .chain(urls)
            .filter(|e| seen.insert((e.name.clone(), e.entity_type.clone())))
            .take(HEURISTIC_ENTITY_LIMIT)
            .collect()
    }
}

impl Extractor for HeuristicExtractor {
    async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        Ok(self.entities(text))
    }

    async fn extract_facts(&self, _text: &str) -> Result<Vec<ExtractedFact>, ExtractionError> {
        Ok(Vec::new())
    }
}

/// Replays extraction results produced elsewhere.
///
/// Supplied lists are returned verbatim for every call. A list that was not
/// supplied falls back to [`HeuristicExtractor`].
#[derive(Debug, Clone, Default)]
pub struct SuppliedExtractor {
    entities: Option<Vec<ExtractedEntity>>,
    facts: Option<Vec<ExtractedFact>>,
}

impl SuppliedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(mut self, entities: Vec<ExtractedEntity>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn with_facts(mut self, facts: Vec<ExtractedFact>) -> Self {
        self.facts = Some(facts);
        self
    }
}

impl Extractor for SuppliedExtractor {
    async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
        match &self.entities {
            Some(entities) => Ok(entities.clone()),
            None => Ok(HeuristicExtractor.entities(text)),
        }
    }

    async fn extract_facts(&self, _text: &str) -> Result<Vec<ExtractedFact>, ExtractionError> {
        Ok(self.facts.clone().unwrap_or_default())
    }
}

/// Parse a generative model's entity reply (a JSON array of
/// `{"name", "type"}` objects, optionally wrapped in a Markdown code fence).
pub fn parse_entities_response(raw: &str) -> Result<Vec<ExtractedEntity>, ExtractionError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|e| {
        tracing::warn!(
            error = %e,
            content_preview = &cleaned[..floor_char_boundary(&cleaned, 200)],
            "Failed to parse entity extraction JSON"
        );
        ExtractionError::Malformed(e.to_string())
    })
}

/// Parse a generative model's fact reply (a JSON array of
/// `{"subject", "predicate", "object"}` objects).
pub fn parse_facts_response(raw: &str) -> Result<Vec<ExtractedFact>, ExtractionError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).map_err(|e| {
        tracing::warn!(
            error = %e,
            content_preview = &cleaned[..floor_char_boundary(&cleaned, 200)],
            "Failed to parse fact extraction JSON"
        );
        ExtractionError::Malformed(e.to_string())
    })
}

fn strip_code_fences(raw: &str) -> String {
    raw.trim().replace("```json", "").replace("```", "").trim().to_string()
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_extracts_names_and_urls() {
        let entities = HeuristicExtractor
            .entities("My name is Alice Smith, see https://example.com/alice for more");
        assert_eq!(entities[0], ExtractedEntity::new("Alice Smith", "PERSON"));
        assert!(entities.contains(&ExtractedEntity::new("https://example.com/alice", "URL")));
        // "My" is too short to count as a name
        assert!(!entities.iter().any(|e| e.name == "My"));
    }

    #[test]
    fn test_heuristic_dedupes_and_caps() {
        let text = "Alice met Bob. Alice and Carol saw Dave, Erin and Frank. Alice left.";
        let entities = HeuristicExtractor.entities(text);
        assert_eq!(entities.len(), HEURISTIC_ENTITY_LIMIT);
        let alice_count = entities.iter().filter(|e| e.name == "Alice").count();
        assert_eq!(alice_count, 1);
    }

    #[tokio::test]
    async fn test_heuristic_produces_no_facts() {
        let facts = HeuristicExtractor.extract_facts("Paris is in France").await.unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn test_supplied_extractor_replays_and_falls_back() {
        let supplied = SuppliedExtractor::new().with_facts(vec![ExtractedFact {
            subject: "Alice".to_string(),
            predicate: "lives in".to_string(),
            object: "Paris".to_string(),
        }]);

        let facts = supplied.extract_facts("ignored").await.unwrap();
        assert_eq!(facts.len(), 1);

        // Entities were not supplied: heuristics apply
        let entities = supplied.extract_entities("Hello Alice").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Hello Alice");

        let fixed = SuppliedExtractor::new().with_entities(Vec::new());
        assert!(fixed.extract_entities("Hello Alice").await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_entities_response_strips_fences() {
        let raw = "```json\n[{\"name\": \"Alice\", \"type\": \"PERSON\"}]\n```";
        let entities = parse_entities_response(raw).unwrap();
        assert_eq!(entities, vec![ExtractedEntity::new("Alice", "PERSON")]);
    }

    #[test]
    fn test_parse_facts_response_rejects_malformed() {
        let err = parse_facts_response("Sure! Here are the facts: none").unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));

        let facts =
            parse_facts_response(r#"[{"subject":"Rust","predicate":"is","object":"fast"}]"#)
                .unwrap();
        assert_eq!(facts[0].object, "fast");
    }
}
