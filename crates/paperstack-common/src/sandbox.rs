use crate::error::PaperstackError;
use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// A sandbox-capped HTTP client that only allows requests to approved
/// domains. All registry and embedding traffic goes through this wrapper so
/// a misconfigured URL cannot reach an arbitrary host.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist of bibliographic
    /// registries and embedding providers, and a 30 second request timeout.
    pub fn new() -> Result<Self, PaperstackError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, PaperstackError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "api.crossref.org",        // DOI registry
            "export.arxiv.org",        // arXiv Atom API
            "eutils.ncbi.nlm.nih.gov", // PubMed E-utilities
            "api.openai.com",          // embedding provider
            "localhost",               // local embedding endpoints
            "127.0.0.1",
        ];
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PaperstackError::Config(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates whether a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperstackError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, PaperstackError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    fn check(&self, url: &str) -> Result<(), PaperstackError> {
        if !self.is_allowed(url) {
            return Err(PaperstackError::Security(format!(
                "domain not in allowlist for URL {}",
                url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_domains_are_allowed() {
        let c = SandboxClient::new().unwrap();
        assert!(c.is_allowed("https://api.crossref.org/works/10.1000/xyz"));
        assert!(c.is_allowed("http://export.arxiv.org/api/query?id_list=2101.00001"));
        assert!(c.is_allowed("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi"));
    }

    #[test]
    fn unknown_domain_is_rejected() {
        let c = SandboxClient::new().unwrap();
        assert!(!c.is_allowed("https://example.com/paper.pdf"));
        assert!(c.get("https://example.com/paper.pdf").is_err());
    }

    #[test]
    fn allow_domain_extends_the_list() {
        let mut c = SandboxClient::new().unwrap();
        assert!(!c.is_allowed("https://registry.internal/x"));
        c.allow_domain("registry.internal");
        assert!(c.is_allowed("https://registry.internal/x"));
    }
}
