//! Embedding clients and the batching layer.
//!
//! The pipeline never calls a provider directly; it goes through
//! `embed_in_batches`, which splits texts into provider-sized batches,
//! retries transient failures, validates counts and dimensions, and
//! l2-normalizes every vector so stored distances are comparable.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use paperstack_common::{RetryPolicy, SandboxClient};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider rate limited the request")]
    RateLimited,

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, EmbeddingError::Malformed(_))
    }
}

/// Vectors for one batch, plus the provider's token accounting.
#[derive(Debug, Clone)]
pub struct EmbedResult {
    pub vectors: Vec<Vec<f32>>,
    pub total_tokens: u64,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn dim(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> std::result::Result<EmbedResult, EmbeddingError>;
}

// =============================================================================
// OpenAI-compatible provider
// =============================================================================

/// Client for any /v1/embeddings endpoint (OpenAI, Ollama, Together...).
pub struct OpenAiEmbedder {
    client: SandboxClient,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        client: SandboxClient,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        dim: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dim,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    #[instrument(skip(self, texts), fields(n = texts.len(), model = %self.model))]
    async fn embed(&self, texts: &[String]) -> std::result::Result<EmbedResult, EmbeddingError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
        });

        let mut req = self
            .client
            .post(&url)
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Unavailable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(EmbeddingError::RateLimited);
        }
        if status.is_server_error() {
            return Err(EmbeddingError::Unavailable(format!("provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(EmbeddingError::Malformed(format!("provider returned {}", status)));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        // The API is not obligated to preserve input order.
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        Ok(EmbedResult {
            vectors: items.into_iter().map(|item| item.embedding).collect(),
            total_tokens: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

// =============================================================================
// Deterministic embedder
// =============================================================================

/// Hash-based embedder for offline runs and tests. Identical text always
/// maps to the identical unit vector.
pub struct DeterministicEmbedder {
    dim: usize,
}

impl DeterministicEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let raw: Vec<f32> = (0..self.dim)
            .map(|i| {
                let byte = digest[i % digest.len()];
                (byte as f32 / 255.0) * 2.0 - 1.0 + (i as f32 * 1e-3)
            })
            .collect();
        normalize(raw)
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<EmbedResult, EmbeddingError> {
        Ok(EmbedResult {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            total_tokens: texts.iter().map(|t| t.split_whitespace().count() as u64).sum(),
        })
    }
}

// =============================================================================
// Batching
// =============================================================================

/// Embed all texts in provider-sized batches, preserving input order.
/// Returns the vectors plus the total token cost the provider reported.
///
/// Fails the whole call once a batch exhausts its retries, so a document
/// never ends up with a partial set of vectors.
#[instrument(skip(client, texts, retry), fields(n = texts.len(), batch_size))]
pub async fn embed_in_batches(
    client: &dyn EmbeddingClient,
    texts: &[String],
    batch_size: usize,
    retry: &RetryPolicy,
) -> Result<(Vec<Vec<f32>>, u64)> {
    if texts.is_empty() {
        return Ok((Vec::new(), 0));
    }
    let batch_size = batch_size.max(1);

    let mut vectors = Vec::with_capacity(texts.len());
    let mut total_tokens = 0u64;
    for batch in texts.chunks(batch_size) {
        let result = retry
            .run(|| client.embed(batch), |e| e.is_transient())
            .await
            .map_err(|e| match e {
                EmbeddingError::Malformed(m) => IngestError::Embedding(m),
                other => IngestError::Transient(other.to_string()),
            })?;

        if result.vectors.len() != batch.len() {
            return Err(IngestError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                result.vectors.len(),
                batch.len()
            )));
        }
        total_tokens += result.total_tokens;
        for vec in result.vectors {
            if vec.len() != client.dim() {
                return Err(IngestError::Embedding(format!(
                    "provider returned dimension {}, expected {}",
                    vec.len(),
                    client.dim()
                )));
            }
            vectors.push(normalize(vec));
        }
        debug!(
            done = vectors.len(),
            tokens = result.total_tokens,
            "Batch embedded"
        );
    }

    Ok((vectors, total_tokens))
}

fn l2_norm(v: &[f32]) -> f32 {
    let s: f32 = v.iter().map(|x| x * x).sum();
    s.sqrt().max(1e-10)
}

fn normalize(v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    v.into_iter().map(|x| x / norm).collect()
}

/// Collapse whitespace and drop control characters before embedding.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
