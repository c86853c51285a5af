//! Intermediate models shared across the pipeline stages.

use paperstack_db::ExtractionMethod;

/// Bibliographic metadata produced by one resolver strategy.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    pub title: String,
    /// Author names in reading form, e.g. "Jane Smith".
    pub authors: Vec<String>,
    pub year: i64,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub abstract_text: Option<String>,
    pub publisher: Option<String>,
    pub method: ExtractionMethod,
}

impl ResolvedMetadata {
    /// A strategy result is only usable when title, authors and year are
    /// all present; otherwise the chain falls through.
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.authors.is_empty() && self.year > 0
    }
}

/// Fields read from a PDF's document information dictionary.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i64>,
}
