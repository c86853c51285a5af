//! PDF conversion with section detection and chunking.
//!
//! A converter turns a file on disk into a `ParsedDocument`: section-aware
//! chunks ready for embedding plus whatever metadata the file itself
//! carries (PDF information dictionary, head text for identifier scans).

use crate::error::{IngestError, Result};
use crate::models::EmbeddedInfo;
use lazy_static::lazy_static;
use lopdf::{Document as PdfDoc, Object};
use paperstack_common::config::ChunkerConfig;
use paperstack_db::ElementType;
use regex::Regex;
use std::path::Path;
use tracing::{debug, instrument};

/// One embeddable unit of document text.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub text: String,
    pub section_title: Option<String>,
    pub section_hierarchy: Vec<String>,
    pub page: Option<i64>,
    pub element_type: ElementType,
}

/// Converter output, before metadata resolution.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub chunks: Vec<RawChunk>,
    pub full_text: String,
    pub embedded: EmbeddedInfo,
    pub page_count: usize,
    /// File stem, used as a last-resort title.
    pub source_name: String,
}

impl ParsedDocument {
    /// Head of the document, where identifiers and titles live.
    pub fn head_text(&self) -> &str {
        let mut end = self.full_text.len().min(4000);
        while !self.full_text.is_char_boundary(end) {
            end -= 1;
        }
        &self.full_text[..end]
    }
}

/// Converts one file format into a parsed document.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, path: &Path) -> Result<ParsedDocument>;
}

// =============================================================================
// PDF converter
// =============================================================================

/// lopdf-based converter with keyword section detection.
pub struct PdfConverter {
    config: ChunkerConfig,
}

impl PdfConverter {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

impl Default for PdfConverter {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl DocumentConverter for PdfConverter {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn convert(&self, path: &Path) -> Result<ParsedDocument> {
        let pdf = PdfDoc::load(path).map_err(|e| IngestError::Parse(e.to_string()))?;

        let mut full_text = String::new();
        let mut pages: Vec<(u32, String)> = Vec::new();
        for page_num in pdf.get_pages().keys() {
            let page_text = pdf.extract_text(&[*page_num]).unwrap_or_default();
            full_text.push_str(&page_text);
            full_text.push('\n');
            pages.push((*page_num, page_text));
        }

        if full_text.trim().is_empty() {
            return Err(IngestError::Parse(format!(
                "no extractable text in {}",
                path.display()
            )));
        }

        let sections = detect_sections(&full_text, &pages);
        let chunks = chunk_sections(&full_text, &sections, &self.config);
        debug!(
            pages = pages.len(),
            sections = sections.len(),
            chunks = chunks.len(),
            "Converted PDF"
        );

        let source_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());

        Ok(ParsedDocument {
            chunks,
            embedded: read_info_dictionary(&pdf),
            page_count: pages.len(),
            full_text,
            source_name,
        })
    }
}

// =============================================================================
// Section detection
// =============================================================================

#[derive(Debug, Clone)]
struct DocumentSection {
    heading: String,
    text: String,
    page: Option<i64>,
}

const SECTION_MARKERS: [&str; 8] = [
    "Abstract",
    "Introduction",
    "Related Work",
    "Methods",
    "Results",
    "Discussion",
    "Conclusion",
    "References",
];

lazy_static! {
    // Matched against the original text, never a lowercased copy:
    // lowercasing can change byte length and would skew every offset.
    static ref SECTION_RE: Regex = Regex::new(
        r"(?i)\b(Abstract|Introduction|Related Work|Methods|Results|Discussion|Conclusion|References)\b"
    )
    .unwrap();
}

fn detect_sections(text: &str, pages: &[(u32, String)]) -> Vec<DocumentSection> {
    let mut found: Vec<(usize, &'static str)> = Vec::new();
    for m in SECTION_RE.find_iter(text) {
        let Some(&heading) = SECTION_MARKERS
            .iter()
            .find(|k| k.eq_ignore_ascii_case(m.as_str()))
        else {
            continue;
        };
        // First occurrence of each heading wins.
        if !found.iter().any(|(_, h)| *h == heading) {
            found.push((m.start(), heading));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    found
        .iter()
        .enumerate()
        .map(|(i, (pos, heading))| {
            let end = found.get(i + 1).map(|(p, _)| *p).unwrap_or(text.len());
            DocumentSection {
                heading: heading.to_string(),
                text: text[*pos..end].to_string(),
                page: find_page_number(pages, *pos),
            }
        })
        .collect()
}

fn find_page_number(pages: &[(u32, String)], char_pos: usize) -> Option<i64> {
    let mut count = 0;
    for (page_num, page_text) in pages {
        count += page_text.len() + 1;
        if count > char_pos {
            return Some(*page_num as i64);
        }
    }
    None
}

// =============================================================================
// Chunking
// =============================================================================

fn chunk_sections(
    full_text: &str,
    sections: &[DocumentSection],
    config: &ChunkerConfig,
) -> Vec<RawChunk> {
    if sections.is_empty() {
        return chunk_text(full_text, None, None, config);
    }

    let mut chunks = Vec::new();
    for section in sections {
        // The abstract stays whole regardless of length.
        if section.heading == "Abstract" {
            chunks.push(RawChunk {
                text: section.text.clone(),
                section_title: Some(section.heading.clone()),
                section_hierarchy: vec![section.heading.clone()],
                page: section.page,
                element_type: classify_element(&section.text),
            });
            continue;
        }
        chunks.extend(chunk_text(
            &section.text,
            Some(&section.heading),
            section.page,
            config,
        ));
    }
    chunks
}

/// Sliding word window with overlap. 1 token is roughly 0.75 words.
fn chunk_text(
    text: &str,
    heading: Option<&str>,
    page: Option<i64>,
    config: &ChunkerConfig,
) -> Vec<RawChunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let words_per_chunk = ((config.max_tokens as f32 * 0.75) as usize).max(1);
    let overlap_words = (config.overlap_tokens as f32 * 0.75) as usize;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + words_per_chunk).min(words.len());
        let content = words[start..end].join(" ");
        chunks.push(RawChunk {
            element_type: classify_element(&content),
            text: content,
            section_title: heading.map(String::from),
            section_hierarchy: heading.map(|h| vec![h.to_string()]).unwrap_or_default(),
            page,
        });

        if end == words.len() {
            break;
        }
        start += words_per_chunk.saturating_sub(overlap_words).max(1);
    }
    chunks
}

fn classify_element(text: &str) -> ElementType {
    let head = text.trim_start();
    if head.starts_with("Table ") || head.starts_with("Table:") {
        ElementType::Table
    } else if head.starts_with("Figure ") || head.starts_with("Fig. ") {
        ElementType::Figure
    } else if head.starts_with("Equation ") || head.starts_with("Eq. ") {
        ElementType::Equation
    } else {
        ElementType::Paragraph
    }
}

// =============================================================================
// PDF information dictionary
// =============================================================================

fn read_info_dictionary(pdf: &PdfDoc) -> EmbeddedInfo {
    let Some(dict) = pdf
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| match obj {
            Object::Reference(id) => pdf.get_object(*id).ok(),
            other => Some(other),
        })
        .and_then(|obj| obj.as_dict().ok())
    else {
        return EmbeddedInfo::default();
    };

    let get = |key: &[u8]| -> Option<String> {
        dict.get(key)
            .ok()
            .and_then(|obj| obj.as_str().ok())
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty())
    };

    // PDF dates look like "D:20240115120000Z"; the year is chars 2..6.
    let year = get(b"CreationDate")
        .and_then(|d| d.get(2..6).map(String::from))
        .and_then(|y| y.parse::<i64>().ok())
        .filter(|y| (1900..=2099).contains(y));

    EmbeddedInfo {
        title: get(b"Title"),
        author: get(b"Author"),
        year,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_detected_with_pages() {
        let text = "Abstract\nWe study chunking.\nIntroduction\nLong ago...\nMethods\nWe measured things.\nResults\nIt worked.";
        let pages = vec![(1u32, text.to_string())];
        let sections = detect_sections(text, &pages);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert!(headings.contains(&"Abstract"));
        assert!(headings.contains(&"Methods"));
        assert_eq!(sections[0].page, Some(1));
    }

    #[test]
    fn section_offsets_survive_non_ascii_text() {
        // 'İ' lowercases to two chars, so a lowercased copy of this text
        // is longer than the original.
        let text = "İstanbul Üniversitesi İİİ\nAbstract\nWe study solvers.\nMethods\nWe measure errors.";
        let pages = vec![(1u32, text.to_string())];
        let sections = detect_sections(text, &pages);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "Abstract");
        assert!(sections[0].text.starts_with("Abstract"));
        assert!(sections[0].text.contains("We study solvers."));
        assert_eq!(sections[1].heading, "Methods");
        assert!(sections[1].text.starts_with("Methods"));
    }

    #[test]
    fn sections_come_back_in_reading_order() {
        let text = "Introduction\nFirst.\nAbstract\nOut of order on purpose.";
        let sections = detect_sections(text, &[(1u32, text.to_string())]);
        assert_eq!(sections[0].heading, "Introduction");
        assert_eq!(sections[1].heading, "Abstract");
    }

    #[test]
    fn abstract_stays_a_single_chunk() {
        let sections = vec![DocumentSection {
            heading: "Abstract".to_string(),
            text: "word ".repeat(2000),
            page: Some(1),
        }];
        let chunks = chunk_sections("", &sections, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_title.as_deref(), Some("Abstract"));
    }

    #[test]
    fn long_sections_split_with_overlap() {
        let config = ChunkerConfig {
            max_tokens: 100,
            overlap_tokens: 10,
            first_pages: 2,
        };
        let chunks = chunk_text(&"word ".repeat(2000), Some("Methods"), Some(3), &config);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.section_title.as_deref() == Some("Methods")));
        assert!(chunks.iter().all(|c| c.page == Some(3)));
    }

    #[test]
    fn sectionless_text_is_still_chunked() {
        let chunks = chunk_sections("just some plain text", &[], &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_title, None);
        assert!(chunks[0].section_hierarchy.is_empty());
    }

    #[test]
    fn tables_and_figures_are_classified() {
        assert_eq!(classify_element("Table 3: ablation results"), ElementType::Table);
        assert_eq!(classify_element("Figure 1. Architecture."), ElementType::Figure);
        assert_eq!(classify_element("Eq. 4 defines the loss"), ElementType::Equation);
        assert_eq!(classify_element("We train for 10 epochs."), ElementType::Paragraph);
    }

    #[test]
    fn head_text_respects_char_boundaries() {
        let doc = ParsedDocument {
            chunks: Vec::new(),
            full_text: "é".repeat(3000),
            embedded: EmbeddedInfo::default(),
            page_count: 1,
            source_name: "x".to_string(),
        };
        let head = doc.head_text();
        assert!(head.len() <= 4000);
        assert!(head.chars().all(|c| c == 'é'));
    }
}
