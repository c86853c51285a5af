//! Bibliographic registry clients.
//!
//! Each registry resolves one identifier type to full metadata. Lookups
//! distinguish transient failures (retryable) from permanent ones, and an
//! identifier unknown to the registry is simply `Ok(None)`.

pub mod arxiv;
pub mod crossref;
pub mod pubmed;

use crate::models::ResolvedMetadata;
use async_trait::async_trait;
use paperstack_common::SandboxClient;
use std::sync::Arc;
use thiserror::Error;

pub use arxiv::ArxivRegistry;
pub use crossref::CrossRefRegistry;
pub use pubmed::PubMedRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Timeout, rate limit, or server-side failure. Worth retrying.
    #[error("transient registry failure: {0}")]
    Transient(String),

    /// The registry rejected the request. Retrying won't help.
    #[error("registry rejected request: {0}")]
    Permanent(String),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Transient(_))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            RegistryError::Transient(err.to_string())
        } else {
            RegistryError::Permanent(err.to_string())
        }
    }
}

/// Classify a non-success HTTP status. 404 is handled by callers as a
/// miss before this runs.
pub(crate) fn status_error(status: reqwest::StatusCode, registry: &str) -> RegistryError {
    if status.as_u16() == 429 || status.is_server_error() {
        RegistryError::Transient(format!("{} returned {}", registry, status))
    } else {
        RegistryError::Permanent(format!("{} returned {}", registry, status))
    }
}

/// Lookup of one identifier type against one registry.
#[async_trait]
pub trait IdentifierRegistry: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve an identifier. `Ok(None)` means the registry does not know
    /// this identifier.
    async fn lookup(&self, id: &str) -> Result<Option<ResolvedMetadata>, RegistryError>;
}

/// The three registries the resolver consults, one per identifier type.
#[derive(Clone)]
pub struct RegistrySet {
    pub doi: Arc<dyn IdentifierRegistry>,
    pub arxiv: Arc<dyn IdentifierRegistry>,
    pub pmid: Arc<dyn IdentifierRegistry>,
}

impl RegistrySet {
    /// Production wiring: CrossRef for DOIs, arXiv for preprints, PubMed
    /// for PMIDs, all through the same sandboxed client.
    pub fn with_defaults(client: SandboxClient, contact_email: &str) -> Self {
        Self {
            doi: Arc::new(CrossRefRegistry::new(client.clone(), contact_email)),
            arxiv: Arc::new(ArxivRegistry::new(client.clone())),
            pmid: Arc::new(PubMedRegistry::new(client)),
        }
    }
}
