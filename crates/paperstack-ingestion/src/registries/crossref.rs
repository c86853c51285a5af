//! CrossRef DOI resolution.
//!
//! API: https://api.crossref.org/works/{doi}
//! Polite pool: set User-Agent with mailto (see CrossRef etiquette).

use super::{status_error, IdentifierRegistry, RegistryError};
use crate::models::ResolvedMetadata;
use async_trait::async_trait;
use paperstack_common::SandboxClient;
use paperstack_db::ExtractionMethod;
use tracing::{debug, instrument};

const CR_API_BASE: &str = "https://api.crossref.org/works";

pub struct CrossRefRegistry {
    client: SandboxClient,
    user_agent: String,
}

impl CrossRefRegistry {
    pub fn new(client: SandboxClient, contact_email: &str) -> Self {
        Self {
            client,
            user_agent: format!("paperstack/0.1 (mailto:{})", contact_email),
        }
    }
}

#[async_trait]
impl IdentifierRegistry for CrossRefRegistry {
    fn name(&self) -> &'static str {
        "crossref"
    }

    #[instrument(skip(self))]
    async fn lookup(&self, doi: &str) -> Result<Option<ResolvedMetadata>, RegistryError> {
        let url = format!("{}/{}", CR_API_BASE, doi);
        let resp = self
            .client
            .get(&url)
            .map_err(|e| RegistryError::Permanent(e.to_string()))?
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(doi, "DOI unknown to CrossRef");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), self.name()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RegistryError::Permanent(format!("CrossRef body: {}", e)))?;
        Ok(Some(work_to_metadata(&body["message"], doi)))
    }
}

fn work_to_metadata(work: &serde_json::Value, doi: &str) -> ResolvedMetadata {
    let title = work["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let authors: Vec<String> = work["author"]
        .as_array()
        .unwrap_or(&vec![])
        .iter()
        .map(|a| {
            let given = a["given"].as_str().unwrap_or("").trim().to_string();
            let family = a["family"].as_str().unwrap_or("").trim().to_string();
            if given.is_empty() {
                family
            } else {
                format!("{} {}", given, family)
            }
        })
        .filter(|name| !name.is_empty())
        .collect();

    let journal = work["container-title"]
        .as_array()
        .and_then(|j| j.first())
        .and_then(|j| j.as_str())
        .map(String::from);

    let year = work["published"]["date-parts"]
        .as_array()
        .and_then(|dp| dp.first())
        .and_then(|dp| dp.as_array())
        .and_then(|parts| parts.first())
        .and_then(|y| y.as_i64())
        .unwrap_or(0);

    // CrossRef returns JATS XML snippets in abstract; strip basic tags
    let abstract_text = work["abstract"].as_str().map(|a| {
        a.replace("<jats:p>", "")
            .replace("</jats:p>", "\n")
            .replace("<jats:italic>", "")
            .replace("</jats:italic>", "")
            .replace("<jats:bold>", "")
            .replace("</jats:bold>", "")
            .trim()
            .to_string()
    });

    ResolvedMetadata {
        title,
        authors,
        year,
        journal,
        doi: Some(doi.to_string()),
        url: Some(format!("https://doi.org/{}", doi)),
        abstract_text,
        publisher: work["publisher"].as_str().map(String::from),
        method: ExtractionMethod::ExternalLookupDoi,
    }
}
