//! Metadata resolver strategy chain.
//!
//! Strategies are consulted in order of trustworthiness: registry lookup by
//! identifier, then the PDF's own information dictionary, then text
//! heuristics. The first complete result wins and its provenance is kept on
//! the record. A transient registry failure aborts the document instead of
//! silently degrading a paper with a known DOI to guessed metadata.

use crate::document::ParsedDocument;
use crate::error::{IngestError, Result};
use crate::identifiers::{extract_identifier, PaperIdentifier};
use crate::models::ResolvedMetadata;
use crate::registries::{IdentifierRegistry, RegistrySet};
use async_trait::async_trait;
use lazy_static::lazy_static;
use paperstack_common::RetryPolicy;
use paperstack_db::ExtractionMethod;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One way of obtaining bibliographic metadata for a document.
///
/// `Ok(None)` means the strategy does not apply; the chain moves on.
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn try_resolve(&self, doc: &ParsedDocument) -> Result<Option<ResolvedMetadata>>;
}

/// Runs the strategy chain and guarantees a usable result.
pub struct MetadataResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl MetadataResolver {
    /// Default chain: registry lookup, info dictionary, text heuristics.
    pub fn new(registries: RegistrySet, retry: RetryPolicy) -> Self {
        Self {
            strategies: vec![
                Box::new(IdentifierLookup::new(registries, retry)),
                Box::new(InfoDictionary),
                Box::new(TextHeuristics),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { strategies }
    }

    /// Resolve metadata for a document, falling back to the filename when
    /// every strategy comes up empty.
    #[instrument(skip(self, doc), fields(source = %doc.source_name))]
    pub async fn resolve(&self, doc: &ParsedDocument) -> Result<ResolvedMetadata> {
        for strategy in &self.strategies {
            match strategy.try_resolve(doc).await? {
                Some(meta) if meta.is_complete() => {
                    info!(strategy = strategy.name(), method = %meta.method, "Metadata resolved");
                    return Ok(meta);
                }
                Some(_) => {
                    debug!(strategy = strategy.name(), "Incomplete result, falling through");
                }
                None => {
                    debug!(strategy = strategy.name(), "Strategy did not apply");
                }
            }
        }

        warn!(source = %doc.source_name, "No strategy applied, using filename");
        Ok(ResolvedMetadata {
            title: doc.source_name.replace(['_', '-'], " ").trim().to_string(),
            authors: vec!["Unknown".to_string()],
            year: chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(2000),
            journal: None,
            doi: None,
            url: None,
            abstract_text: None,
            publisher: None,
            method: ExtractionMethod::HeuristicParse,
        })
    }
}

// =============================================================================
// Registry lookup
// =============================================================================

/// Scans the document head for an identifier and asks the matching
/// registry, retrying transient failures.
pub struct IdentifierLookup {
    registries: RegistrySet,
    retry: RetryPolicy,
}

impl IdentifierLookup {
    pub fn new(registries: RegistrySet, retry: RetryPolicy) -> Self {
        Self { registries, retry }
    }
}

#[async_trait]
impl ResolveStrategy for IdentifierLookup {
    fn name(&self) -> &'static str {
        "identifier-lookup"
    }

    async fn try_resolve(&self, doc: &ParsedDocument) -> Result<Option<ResolvedMetadata>> {
        let Some(identifier) = extract_identifier(doc.head_text()) else {
            return Ok(None);
        };

        let (registry, id): (&Arc<dyn IdentifierRegistry>, &str) = match &identifier {
            PaperIdentifier::Doi(id) => (&self.registries.doi, id),
            PaperIdentifier::Arxiv(id) => (&self.registries.arxiv, id),
            PaperIdentifier::Pmid(id) => (&self.registries.pmid, id),
        };
        debug!(registry = registry.name(), id, "Identifier found");

        let outcome = self
            .retry
            .run(|| registry.lookup(id), |e| e.is_transient())
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_transient() => Err(IngestError::Transient(format!(
                "{} lookup for {}: {}",
                registry.name(),
                id,
                e
            ))),
            Err(e) => {
                warn!(registry = registry.name(), id, error = %e, "Lookup rejected");
                Ok(None)
            }
        }
    }
}

// =============================================================================
// PDF information dictionary
// =============================================================================

/// Uses the title, author, and creation year the PDF itself declares.
pub struct InfoDictionary;

#[async_trait]
impl ResolveStrategy for InfoDictionary {
    fn name(&self) -> &'static str {
        "info-dictionary"
    }

    async fn try_resolve(&self, doc: &ParsedDocument) -> Result<Option<ResolvedMetadata>> {
        let info = &doc.embedded;
        let (Some(title), Some(author), Some(year)) = (&info.title, &info.author, info.year)
        else {
            return Ok(None);
        };

        Ok(Some(ResolvedMetadata {
            title: title.clone(),
            authors: split_authors(author),
            year,
            journal: None,
            doi: None,
            url: None,
            abstract_text: None,
            publisher: None,
            method: ExtractionMethod::EmbeddedMetadata,
        }))
    }
}

// =============================================================================
// Text heuristics
// =============================================================================

lazy_static! {
    static ref YEAR_RE: Regex = Regex::new(r"\b(19|20)\d{2}\b").unwrap();
}

/// Last resort before the filename: first substantial line as the title,
/// the following line as authors when it plausibly is one.
pub struct TextHeuristics;

#[async_trait]
impl ResolveStrategy for TextHeuristics {
    fn name(&self) -> &'static str {
        "text-heuristics"
    }

    async fn try_resolve(&self, doc: &ParsedDocument) -> Result<Option<ResolvedMetadata>> {
        let head = doc.head_text();
        let mut lines = head.lines().map(str::trim).filter(|l| !l.is_empty());

        let Some(title) = lines.find(|l| l.len() > 10) else {
            return Ok(None);
        };

        let authors = lines
            .next()
            .filter(|l| looks_like_author_line(l))
            .map(|l| split_authors(l))
            .unwrap_or_else(|| vec!["Unknown".to_string()]);

        let year = YEAR_RE
            .find(head)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or_else(|| {
                chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(2000)
            });

        Ok(Some(ResolvedMetadata {
            title: title.to_string(),
            authors,
            year,
            journal: None,
            doi: None,
            url: None,
            abstract_text: None,
            publisher: None,
            method: ExtractionMethod::HeuristicParse,
        }))
    }
}

fn looks_like_author_line(line: &str) -> bool {
    line.len() < 200
        && line.contains(' ')
        && !line.chars().any(|c| c.is_ascii_digit())
        && line.chars().filter(|c| c.is_alphabetic()).count() * 2 > line.len()
}

/// Split an author string on the separators PDFs and authors use.
fn split_authors(raw: &str) -> Vec<String> {
    let normalized = raw.replace(" and ", ";").replace(',', ";");
    let authors: Vec<String> = normalized
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if authors.is_empty() {
        vec![raw.trim().to_string()]
    } else {
        authors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmbeddedInfo;

    fn doc(text: &str, embedded: EmbeddedInfo) -> ParsedDocument {
        ParsedDocument {
            chunks: Vec::new(),
            full_text: text.to_string(),
            embedded,
            page_count: 1,
            source_name: "my_interesting-paper".to_string(),
        }
    }

    #[tokio::test]
    async fn info_dictionary_needs_all_three_fields() {
        let full = EmbeddedInfo {
            title: Some("A Study of Things".to_string()),
            author: Some("Jane Smith and Bob Jones".to_string()),
            year: Some(2022),
        };
        let m = InfoDictionary
            .try_resolve(&doc("", full))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.title, "A Study of Things");
        assert_eq!(m.authors, vec!["Jane Smith", "Bob Jones"]);
        assert_eq!(m.method, ExtractionMethod::EmbeddedMetadata);

        let partial = EmbeddedInfo {
            title: Some("A Study of Things".to_string()),
            author: None,
            year: Some(2022),
        };
        assert!(InfoDictionary
            .try_resolve(&doc("", partial))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn heuristics_read_title_authors_and_year() {
        let text = "Learning to Retrieve Passages\nAlice Chen and David Park\nPublished 2021\nAbstract...";
        let m = TextHeuristics
            .try_resolve(&doc(text, EmbeddedInfo::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.title, "Learning to Retrieve Passages");
        assert_eq!(m.authors, vec!["Alice Chen", "David Park"]);
        assert_eq!(m.year, 2021);
        assert_eq!(m.method, ExtractionMethod::HeuristicParse);
    }

    #[tokio::test]
    async fn implausible_author_line_becomes_unknown() {
        let text = "A Sufficiently Long Title Line\nSection 2.3 of volume 12\nmore text";
        let m = TextHeuristics
            .try_resolve(&doc(text, EmbeddedInfo::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.authors, vec!["Unknown"]);
    }

    #[tokio::test]
    async fn resolver_falls_back_to_filename() {
        let resolver = MetadataResolver::with_strategies(vec![Box::new(TextHeuristics)]);
        let m = resolver
            .resolve(&doc("x\ny\nz", EmbeddedInfo::default()))
            .await
            .unwrap();
        assert_eq!(m.title, "my interesting paper");
        assert_eq!(m.authors, vec!["Unknown"]);
        assert_eq!(m.method, ExtractionMethod::HeuristicParse);
    }

    #[test]
    fn author_splitting_handles_comma_lists() {
        assert_eq!(
            split_authors("A. One, B. Two and C. Three"),
            vec!["A. One", "B. Two", "C. Three"]
        );
    }
}
