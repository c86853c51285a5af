//! Configuration loading for paperstack.
//! Reads paperstack.toml from the current directory or path in PAPERSTACK_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    /// Directory where ingested files and their .bib entries are archived
    /// under the citation key. No archiving when unset.
    #[serde(default)]
    pub library_path: Option<String>,
}

fn default_store_path() -> String { "./paperstack.lancedb".to_string() }
fn default_vector_dim() -> usize  { 1536 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            vector_dim: default_vector_dim(),
            library_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Contact email sent in the User-Agent of registry requests.
    #[serde(default = "default_contact_email")]
    pub contact_email: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
}

fn default_contact_email()       -> String { "paperstack@localhost".to_string() }
fn default_max_retries()         -> u32    { 3 }
fn default_base_delay_ms()       -> u64    { 1_000 }
fn default_lookup_timeout_secs() -> u64    { 15 }

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            contact_email: default_contact_email(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_embed_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_embed_model()    -> String { "text-embedding-3-small".to_string() }
fn default_embed_base_url() -> String { "https://api.openai.com".to_string() }
fn default_batch_size()     -> usize  { 32 }
fn default_api_key_env()    -> String { "OPENAI_API_KEY".to_string() }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embed_model(),
            base_url: default_embed_base_url(),
            batch_size: default_batch_size(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Pages scanned for title and identifier heuristics.
    #[serde(default = "default_first_pages")]
    pub first_pages: usize,
}

fn default_max_tokens()     -> usize { 510 }
fn default_overlap_tokens() -> usize { 64 }
fn default_first_pages()    -> usize { 2 }

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            first_pages: default_first_pages(),
        }
    }
}

impl Config {
    /// Load configuration from paperstack.toml.
    /// Checks PAPERSTACK_CONFIG env var first, then current directory.
    /// Falls back to defaults when no file exists.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let path = std::env::var("PAPERSTACK_CONFIG")
            .unwrap_or_else(|_| "paperstack.toml".to_string());

        if !Path::new(&path).exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
