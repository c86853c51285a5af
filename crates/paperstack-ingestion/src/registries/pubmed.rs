//! PubMed PMID resolution via NCBI E-utilities.
//!
//! API: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi

use super::{status_error, IdentifierRegistry, RegistryError};
use crate::models::ResolvedMetadata;
use async_trait::async_trait;
use paperstack_common::SandboxClient;
use paperstack_db::ExtractionMethod;
use tracing::{debug, instrument};

const ESUMMARY_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi";

pub struct PubMedRegistry {
    client: SandboxClient,
}

impl PubMedRegistry {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentifierRegistry for PubMedRegistry {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    #[instrument(skip(self))]
    async fn lookup(&self, pmid: &str) -> Result<Option<ResolvedMetadata>, RegistryError> {
        let resp = self
            .client
            .get(ESUMMARY_URL)
            .map_err(|e| RegistryError::Permanent(e.to_string()))?
            .query(&[("db", "pubmed"), ("id", pmid), ("retmode", "json")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), self.name()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RegistryError::Permanent(format!("PubMed body: {}", e)))?;

        let summary = &body["result"][pmid];
        // Unknown PMIDs come back as an error object instead of a summary.
        if summary.is_null() || summary.get("error").is_some() {
            debug!(pmid, "PMID unknown to PubMed");
            return Ok(None);
        }

        Ok(Some(summary_to_metadata(summary, pmid)))
    }
}

fn summary_to_metadata(summary: &serde_json::Value, pmid: &str) -> ResolvedMetadata {
    let title = summary["title"]
        .as_str()
        .unwrap_or("")
        .trim_end_matches('.')
        .to_string();

    let authors: Vec<String> = summary["authors"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .filter_map(|a| a["name"].as_str())
        .map(String::from)
        .collect();

    // pubdate looks like "2024 Jan 5"; the year is the first token.
    let year = summary["pubdate"]
        .as_str()
        .and_then(|d| d.split_whitespace().next())
        .and_then(|y| y.parse::<i64>().ok())
        .unwrap_or(0);

    let doi = summary["articleids"]
        .as_array()
        .and_then(|ids| {
            ids.iter()
                .find(|id| id["idtype"].as_str() == Some("doi"))
                .and_then(|id| id["value"].as_str())
        })
        .map(String::from);

    ResolvedMetadata {
        title,
        authors,
        year,
        journal: summary["fulljournalname"].as_str().map(String::from),
        doi,
        url: Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid)),
        abstract_text: None,
        publisher: None,
        method: ExtractionMethod::ExternalLookupPmid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_parsed() {
        let summary = serde_json::json!({
            "title": "CRISPR screening in pancreatic cancer.",
            "authors": [
                { "name": "Smith J", "authtype": "Author" },
                { "name": "Jones K", "authtype": "Author" }
            ],
            "pubdate": "2021 Jul 15",
            "fulljournalname": "Nature Medicine",
            "articleids": [
                { "idtype": "pubmed", "value": "34265844" },
                { "idtype": "doi", "value": "10.1038/s41591-021-01000-w" }
            ]
        });
        let m = summary_to_metadata(&summary, "34265844");
        assert_eq!(m.title, "CRISPR screening in pancreatic cancer");
        assert_eq!(m.authors, vec!["Smith J", "Jones K"]);
        assert_eq!(m.year, 2021);
        assert_eq!(m.journal.as_deref(), Some("Nature Medicine"));
        assert_eq!(m.doi.as_deref(), Some("10.1038/s41591-021-01000-w"));
        assert_eq!(
            m.url.as_deref(),
            Some("https://pubmed.ncbi.nlm.nih.gov/34265844/")
        );
        assert_eq!(m.method, ExtractionMethod::ExternalLookupPmid);
        assert!(m.is_complete());
    }

    #[test]
    fn missing_pubdate_leaves_year_zero() {
        let summary = serde_json::json!({
            "title": "Untitled",
            "authors": [{ "name": "Doe J" }]
        });
        let m = summary_to_metadata(&summary, "1");
        assert_eq!(m.year, 0);
        assert!(!m.is_complete());
    }
}
