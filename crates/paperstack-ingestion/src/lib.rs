//! Paperstack ingestion pipeline.
//!
//! Turns PDF research papers into searchable, citable records:
//!
//! 1. Hash the file and short-circuit duplicates.
//! 2. Convert the PDF into section-aware chunks.
//! 3. Resolve bibliographic metadata through a strategy chain
//!    (registry lookup by DOI/arXiv/PMID, embedded PDF metadata,
//!    text heuristics), tracking how the metadata was obtained.
//! 4. Assign a unique BibTeX citation key.
//! 5. Embed the chunks and store them denormalized in LanceDB.

pub mod bibtex;
pub mod document;
pub mod embedding;
pub mod error;
pub mod identifiers;
pub mod models;
pub mod pipeline;
pub mod records;
pub mod registries;
pub mod resolver;

pub use document::{DocumentConverter, ParsedDocument, PdfConverter, RawChunk};
pub use embedding::{DeterministicEmbedder, EmbeddingClient, OpenAiEmbedder};
pub use error::{IngestError, Result};
pub use models::ResolvedMetadata;
pub use pipeline::{
    BatchSummary, IngestOutcome, IngestRequest, MetadataPatch, PaperDetails, Pipeline, SearchHit,
};
pub use resolver::MetadataResolver;
