//! arXiv preprint resolution.
//!
//! API: http://export.arxiv.org/api/query?id_list={id}
//! The response is an Atom feed; an unknown ID still yields a feed, with a
//! stub entry that has no authors.

use super::{status_error, IdentifierRegistry, RegistryError};
use crate::models::ResolvedMetadata;
use async_trait::async_trait;
use paperstack_common::SandboxClient;
use paperstack_db::ExtractionMethod;
use serde::Deserialize;
use tracing::{debug, instrument};

const ARXIV_API: &str = "http://export.arxiv.org/api/query";

pub struct ArxivRegistry {
    client: SandboxClient,
}

impl ArxivRegistry {
    pub fn new(client: SandboxClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: String,
    #[serde(rename = "author", default)]
    authors: Vec<AuthorTag>,
}

#[derive(Debug, Deserialize)]
struct AuthorTag {
    #[serde(default)]
    name: String,
}

#[async_trait]
impl IdentifierRegistry for ArxivRegistry {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    #[instrument(skip(self))]
    async fn lookup(&self, id: &str) -> Result<Option<ResolvedMetadata>, RegistryError> {
        let url = format!("{}?id_list={}", ARXIV_API, id);
        let resp = self
            .client
            .get(&url)
            .map_err(|e| RegistryError::Permanent(e.to_string()))?
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), self.name()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| RegistryError::Permanent(format!("arXiv body: {}", e)))?;
        let feed: Feed = quick_xml::de::from_str(&body)
            .map_err(|e| RegistryError::Permanent(format!("arXiv feed: {}", e)))?;

        let Some(entry) = feed.entries.first() else {
            debug!(id, "ID unknown to arXiv");
            return Ok(None);
        };
        // Error stubs carry a title like "Error" and no authors.
        if entry.authors.is_empty() {
            debug!(id, "arXiv returned an error stub");
            return Ok(None);
        }

        Ok(Some(entry_to_metadata(entry, id)))
    }
}

fn entry_to_metadata(entry: &Entry, id: &str) -> ResolvedMetadata {
    // arXiv wraps titles and abstracts across lines.
    let title = entry.title.split_whitespace().collect::<Vec<_>>().join(" ");
    let summary = entry.summary.split_whitespace().collect::<Vec<_>>().join(" ");

    let year = entry
        .published
        .get(..4)
        .and_then(|y| y.parse::<i64>().ok())
        .unwrap_or(0);

    ResolvedMetadata {
        title,
        authors: entry
            .authors
            .iter()
            .map(|a| a.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
        year,
        journal: Some("arXiv preprint".to_string()),
        doi: None,
        url: Some(format!("https://arxiv.org/abs/{}", id)),
        abstract_text: if summary.is_empty() { None } else { Some(summary) },
        publisher: None,
        method: ExtractionMethod::ExternalLookupArxiv,
    }
}
