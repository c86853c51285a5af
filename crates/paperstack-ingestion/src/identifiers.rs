//! Identifier extraction from document text.
//!
//! Scans the head of a document for a DOI, arXiv ID, or PubMed ID.
//! DOI wins over arXiv, arXiv over PMID, since a DOI lookup returns the
//! richest metadata.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DOI_RE: Regex =
        Regex::new(r"10\.\d{4,9}/[-._;()/:a-zA-Z0-9]+").unwrap();
    static ref ARXIV_RE: Regex =
        Regex::new(r"(?i)arxiv[:\s]*(\d{4}\.\d{4,5})(v\d+)?").unwrap();
    static ref ARXIV_URL_RE: Regex =
        Regex::new(r"arxiv\.org/abs/(\d{4}\.\d{4,5})(v\d+)?").unwrap();
    static ref PMID_RE: Regex = Regex::new(r"PMID[:\s]*(\d{1,8})").unwrap();
}

/// A registry identifier found in document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperIdentifier {
    Doi(String),
    Arxiv(String),
    Pmid(String),
}

/// Find the strongest identifier in the given text.
pub fn extract_identifier(text: &str) -> Option<PaperIdentifier> {
    if let Some(m) = DOI_RE.find(text) {
        // PDFs often run a sentence right into the DOI; strip trailing
        // punctuation that is never part of one.
        let doi = m.as_str().trim_end_matches(['.', ',', ';']).to_string();
        return Some(PaperIdentifier::Doi(doi));
    }
    if let Some(caps) = ARXIV_RE.captures(text).or_else(|| ARXIV_URL_RE.captures(text)) {
        return Some(PaperIdentifier::Arxiv(caps[1].to_string()));
    }
    if let Some(caps) = PMID_RE.captures(text) {
        return Some(PaperIdentifier::Pmid(caps[1].to_string()));
    }
    None
}
