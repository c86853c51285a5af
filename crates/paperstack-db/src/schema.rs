//! Schema definitions for the LanceDB chunks table.
//!
//! The store is deliberately denormalized. One table holds every chunk, and
//! each chunk row embeds the complete bibliographic record of its paper.
//! Metadata corrections rewrite all rows of a paper in place.

/// Single table holding all chunk rows.
pub const TABLE_CHUNKS: &str = "chunks";

// =============================================================================
// Provenance
// =============================================================================

/// How a paper's bibliographic metadata was obtained.
///
/// Registry lookups are authoritative; embedded PDF metadata and heuristic
/// text parsing are low confidence and flagged as such in bibliographies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExtractionMethod {
    ExternalLookupDoi,
    ExternalLookupArxiv,
    ExternalLookupPmid,
    EmbeddedMetadata,
    HeuristicParse,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::ExternalLookupDoi => "external-lookup-doi",
            ExtractionMethod::ExternalLookupArxiv => "external-lookup-arxiv",
            ExtractionMethod::ExternalLookupPmid => "external-lookup-pmid",
            ExtractionMethod::EmbeddedMetadata => "embedded-metadata",
            ExtractionMethod::HeuristicParse => "heuristic-parse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "external-lookup-doi" => Some(ExtractionMethod::ExternalLookupDoi),
            "external-lookup-arxiv" => Some(ExtractionMethod::ExternalLookupArxiv),
            "external-lookup-pmid" => Some(ExtractionMethod::ExternalLookupPmid),
            "embedded-metadata" => Some(ExtractionMethod::EmbeddedMetadata),
            "heuristic-parse" => Some(ExtractionMethod::HeuristicParse),
            _ => None,
        }
    }

    /// True when the metadata did not come from a bibliographic registry.
    pub fn is_low_confidence(&self) -> bool {
        matches!(
            self,
            ExtractionMethod::EmbeddedMetadata | ExtractionMethod::HeuristicParse
        )
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structural kind of a chunk's source element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ElementType {
    Paragraph,
    Table,
    Figure,
    Equation,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Paragraph => "paragraph",
            ElementType::Table => "table",
            ElementType::Figure => "figure",
            ElementType::Equation => "equation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paragraph" => Some(ElementType::Paragraph),
            "table" => Some(ElementType::Table),
            "figure" => Some(ElementType::Figure),
            "equation" => Some(ElementType::Equation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Records
// =============================================================================

/// Bibliographic record of one paper, repeated on every chunk row.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PaperRecord {
    /// SHA-256 of the source file, hex encoded. Identifies the paper.
    pub content_hash: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: i64,
    pub journal: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub abstract_text: Option<String>,
    pub publisher: Option<String>,
    /// Unique BibTeX key, e.g. "Smith2024" or "Smith2024a".
    pub citation_key: String,
    pub bibtex_entry: String,
    pub extraction_method: ExtractionMethod,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tags: Vec<String>,
    pub notes: String,
}

/// One chunk row as stored in LanceDB.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChunkRow {
    /// `{content_hash}-{ordinal:04}`.
    pub chunk_id: String,
    /// Position of the chunk within its paper's reading order.
    pub ordinal: i64,
    pub text: String,
    pub section_title: Option<String>,
    pub section_hierarchy: Vec<String>,
    pub page: Option<i64>,
    pub element_type: ElementType,
    pub paper: PaperRecord,
    pub embedding: Vec<f32>,
}

// =============================================================================
// Queries
// =============================================================================

/// Structured filter applied to vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub min_year: Option<i64>,
    pub section: Option<String>,
    pub tag: Option<String>,
}

impl SearchFilter {
    /// Render the filter as a SQL predicate, or None when empty.
    pub fn to_predicate(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(year) = self.min_year {
            clauses.push(format!("year >= {}", year));
        }
        if let Some(ref section) = self.section {
            clauses.push(format!("section_title = '{}'", escape(section)));
        }
        if let Some(ref tag) = self.tag {
            // Tags are stored comma-joined. Wrapping both sides in commas
            // makes this exact membership, not substring matching, so a
            // filter on "ml" cannot match "html" or "mlops".
            clauses.push(format!("(',' || tags || ',') LIKE '%,{},%'", escape(tag)));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }
}

/// Escape a string literal for a LanceDB SQL predicate.
pub fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// Store-wide counts reported to callers.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub papers: u64,
    pub chunks: u64,
    /// Paper count per publication year.
    pub year_histogram: std::collections::BTreeMap<i64, u64>,
    pub vector_dim: usize,
    pub path: String,
}
