//! Ingestion error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The document could not be read or yielded no text.
    #[error("parse error: {0}")]
    Parse(String),

    /// An external service kept failing after the retry budget.
    #[error("transient external failure: {0}")]
    Transient(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// Metadata or chunk rows that cannot be stored as-is.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("incomplete metadata: {0}")]
    MetadataIncomplete(String),

    #[error("store error: {0}")]
    Store(#[from] paperstack_db::DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
