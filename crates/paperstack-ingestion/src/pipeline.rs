//! Ingestion pipeline orchestration.
//!
//! `Pipeline` owns every stage through explicit dependencies: the store,
//! the document converter, the resolver chain, and the embedding client.
//! Citation key assignment and the paper insert run under one ingest lock,
//! so keys are unique even for concurrent ingests. Hashing, conversion,
//! resolution, and embedding all happen outside the lock.

use crate::bibtex::{assign_citation_key, format_entry, surname};
use crate::document::{DocumentConverter, PdfConverter};
use crate::embedding::{clean_text, embed_in_batches, EmbeddingClient, OpenAiEmbedder};
use crate::error::{IngestError, Result};
use crate::models::ResolvedMetadata;
use crate::records::build_chunk_rows;
use crate::registries::RegistrySet;
use crate::resolver::MetadataResolver;
use paperstack_common::{Config, RetryPolicy, SandboxClient};
use paperstack_db::{ChunkRow, ChunkStore, Database, PaperRecord, SearchFilter, StoreStats};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How far the search over-fetches before collapsing to one hit per paper.
const SEARCH_OVERFETCH: usize = 4;
const EXCERPT_CHARS: usize = 500;

pub struct Pipeline {
    store: ChunkStore,
    converter: Arc<dyn DocumentConverter>,
    resolver: MetadataResolver,
    embedder: Arc<dyn EmbeddingClient>,
    batch_size: usize,
    retry: RetryPolicy,
    /// When set, ingested files and their .bib entries are archived here
    /// under the citation key and removed again on delete.
    library: Option<PathBuf>,
    ingest_lock: Mutex<()>,
}

/// What happened to one ingested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Added {
        citation_key: String,
        chunks: usize,
        /// Embedding cost the provider reported for this document.
        tokens: u64,
    },
    /// The exact file is already stored. Not an error.
    Duplicate { citation_key: String },
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub tags: Vec<String>,
}

impl IngestRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(path: impl Into<PathBuf>, tags: Vec<String>) -> Self {
        Self {
            path: path.into(),
            tags,
        }
    }
}

/// Summary of one batch run.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub job_id: Uuid,
    pub added: usize,
    pub duplicates: usize,
    pub failures: Vec<DocumentFailure>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DocumentFailure {
    pub path: PathBuf,
    pub error: String,
}

/// One search result, collapsed to the best chunk of its paper.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub citation_key: String,
    pub title: String,
    pub year: i64,
    pub chunk_id: String,
    pub section_title: Option<String>,
    pub page: Option<i64>,
    pub excerpt: String,
    pub distance: f32,
    pub extraction_method: paperstack_db::ExtractionMethod,
}

/// Paper record plus its chunk count.
#[derive(Debug, Clone)]
pub struct PaperDetails {
    pub paper: PaperRecord,
    pub chunks: usize,
}

/// Fields a metadata correction may change. The citation key is stable.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub year: Option<i64>,
    pub journal: Option<Option<String>>,
    pub doi: Option<Option<String>>,
    pub url: Option<Option<String>>,
    pub abstract_text: Option<Option<String>>,
    pub publisher: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl Pipeline {
    pub fn new(
        store: ChunkStore,
        converter: Arc<dyn DocumentConverter>,
        resolver: MetadataResolver,
        embedder: Arc<dyn EmbeddingClient>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            converter,
            resolver,
            embedder,
            batch_size,
            retry,
            library: None,
            ingest_lock: Mutex::new(()),
        }
    }

    /// Archive ingested files and per-paper .bib entries under this
    /// directory, named by citation key.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library = Some(dir.into());
        self
    }

    /// Build a pipeline from loaded configuration: sandboxed HTTP client,
    /// registry chain, OpenAI-compatible embedder, and a LanceDB store at
    /// the configured path.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = SandboxClient::with_timeout(Duration::from_secs(
            config.resolver.lookup_timeout_secs,
        ))
        .map_err(|e| IngestError::Other(anyhow::Error::new(e)))?;

        let retry = RetryPolicy {
            max_attempts: config.resolver.max_retries,
            base_delay: Duration::from_millis(config.resolver.base_delay_ms),
            ..Default::default()
        };

        let registries = RegistrySet::with_defaults(client.clone(), &config.resolver.contact_email);
        let resolver = MetadataResolver::new(registries, retry.clone());

        let api_key = std::env::var(&config.embedding.api_key_env).ok();
        let embedder = OpenAiEmbedder::new(
            client,
            &config.embedding.base_url,
            &config.embedding.model,
            api_key,
            config.store.vector_dim,
        );

        let db = Database::open(&config.store.path, config.store.vector_dim).await?;
        db.initialize().await?;
        let store = ChunkStore::new(Arc::new(db));

        let mut pipeline = Self::new(
            store,
            Arc::new(PdfConverter::new(config.chunker.clone())),
            resolver,
            Arc::new(embedder),
            config.embedding.batch_size,
            retry,
        );
        if let Some(ref dir) = config.store.library_path {
            pipeline = pipeline.with_library_dir(dir);
        }
        Ok(pipeline)
    }

    /// Ingest one document end to end.
    #[instrument(skip(self, request), fields(path = %request.path.display()))]
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        let bytes = tokio::fs::read(&request.path).await?;
        let content_hash = hex::encode(Sha256::digest(&bytes));

        // Cheap duplicate check before any expensive work.
        if self.store.exists(&content_hash).await? {
            let citation_key = self.stored_key(&content_hash).await?;
            info!(citation_key, "Duplicate document, skipping");
            return Ok(IngestOutcome::Duplicate { citation_key });
        }

        let doc = self.converter.convert(&request.path)?;
        if doc.chunks.is_empty() {
            return Err(IngestError::Parse(format!(
                "document produced no chunks: {}",
                request.path.display()
            )));
        }

        let metadata = self.resolver.resolve(&doc).await?;

        let texts: Vec<String> = doc.chunks.iter().map(|c| clean_text(&c.text)).collect();
        let (vectors, tokens) =
            embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size, &self.retry).await?;

        // Key assignment and insert are serialized: two concurrent ingests
        // must never read the same key set.
        let _guard = self.ingest_lock.lock().await;

        if self.store.exists(&content_hash).await? {
            let citation_key = self.stored_key(&content_hash).await?;
            return Ok(IngestOutcome::Duplicate { citation_key });
        }

        let keys = self.store.citation_keys().await?;
        let first_author = metadata
            .authors
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown");
        let citation_key = assign_citation_key(&surname(first_author), metadata.year, &keys);
        let bibtex_entry = format_entry(&citation_key, &metadata);

        let paper = PaperRecord {
            content_hash,
            title: metadata.title.clone(),
            authors: metadata.authors.clone(),
            year: metadata.year,
            journal: metadata.journal.clone(),
            doi: metadata.doi.clone(),
            url: metadata.url.clone(),
            abstract_text: metadata.abstract_text.clone(),
            publisher: metadata.publisher.clone(),
            citation_key: citation_key.clone(),
            bibtex_entry,
            extraction_method: metadata.method,
            created_at: chrono::Utc::now(),
            tags: sanitize_tags(&request.tags),
            notes: String::new(),
        };

        let rows = build_chunk_rows(&doc.chunks, vectors, &paper)?;
        self.store.insert_rows(&rows).await?;
        self.archive_paper(&request.path, &paper).await?;

        info!(
            citation_key,
            chunks = rows.len(),
            tokens,
            method = %paper.extraction_method,
            "Paper added"
        );
        Ok(IngestOutcome::Added {
            citation_key,
            chunks: rows.len(),
            tokens,
        })
    }

    /// Ingest many documents, continuing past per-document failures.
    #[instrument(skip(self, paths, tags), fields(n = paths.len()))]
    pub async fn ingest_batch(&self, paths: &[PathBuf], tags: &[String]) -> BatchSummary {
        let job_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        let mut summary = BatchSummary {
            job_id,
            added: 0,
            duplicates: 0,
            failures: Vec::new(),
            duration_ms: 0,
        };

        for path in paths {
            let request = IngestRequest::with_tags(path.clone(), tags.to_vec());
            match self.ingest(&request).await {
                Ok(IngestOutcome::Added { .. }) => summary.added += 1,
                Ok(IngestOutcome::Duplicate { .. }) => summary.duplicates += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Document failed");
                    summary.failures.push(DocumentFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %job_id,
            added = summary.added,
            duplicates = summary.duplicates,
            failed = summary.failures.len(),
            "Batch complete"
        );
        summary
    }

    /// Semantic search, one hit per paper.
    #[instrument(skip(self, filter))]
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let cleaned = vec![clean_text(query)];
        let (mut vectors, _) =
            embed_in_batches(self.embedder.as_ref(), &cleaned, self.batch_size, &self.retry)
                .await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| IngestError::Embedding("no vector for query".to_string()))?;

        // Over-fetch so deduplication still fills k papers.
        let fetch = (k * SEARCH_OVERFETCH).max(k);
        let hits = self
            .store
            .query_by_vector(&vector, fetch, filter.as_ref())
            .await?;

        let mut deduped = dedupe_by_paper(hits);
        deduped.truncate(k);

        Ok(deduped
            .into_iter()
            .map(|(row, distance)| SearchHit {
                citation_key: row.paper.citation_key.clone(),
                title: row.paper.title.clone(),
                year: row.paper.year,
                chunk_id: row.chunk_id.clone(),
                section_title: row.section_title.clone(),
                page: row.page,
                excerpt: excerpt(&row.text),
                distance,
                extraction_method: row.paper.extraction_method,
            })
            .collect())
    }

    /// Look up one paper by citation key.
    pub async fn get_by_key(&self, citation_key: &str) -> Result<Option<PaperDetails>> {
        let rows = self.store.find_by_key(citation_key).await?;
        Ok(rows.first().map(|first| PaperDetails {
            paper: first.paper.clone(),
            chunks: rows.len(),
        }))
    }

    /// Remove a paper and all its chunks. Returns the removed chunk count.
    #[instrument(skip(self))]
    pub async fn delete_by_key(&self, citation_key: &str) -> Result<u64> {
        let removed = self.store.delete_by_key(citation_key).await?;
        if removed == 0 {
            warn!(citation_key, "Delete matched nothing");
        } else {
            self.remove_archived(citation_key).await?;
            info!(citation_key, removed, "Paper deleted");
        }
        Ok(removed)
    }

    /// Correct a paper's metadata in place.
    ///
    /// Rewrites every chunk row of the paper with the patched record and a
    /// regenerated BibTeX entry. Text and embeddings are untouched, and the
    /// citation key never changes.
    #[instrument(skip(self, patch))]
    pub async fn update_metadata(
        &self,
        citation_key: &str,
        patch: &MetadataPatch,
    ) -> Result<PaperRecord> {
        let _guard = self.ingest_lock.lock().await;

        let mut rows = self.store.find_by_key(citation_key).await?;
        let first = rows
            .first()
            .ok_or_else(|| paperstack_db::DbError::NotFound(citation_key.to_string()))?;

        let mut paper = first.paper.clone();
        apply_patch(&mut paper, patch);
        paper.bibtex_entry = format_entry(&paper.citation_key, &record_to_metadata(&paper));

        for row in &mut rows {
            row.paper = paper.clone();
        }
        self.store.rewrite_paper(&rows).await?;
        self.rewrite_archived_bib(&paper).await?;

        info!(citation_key, "Metadata updated");
        Ok(paper)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats().await?)
    }

    /// BibTeX entries for the requested citation keys, sorted by key. An
    /// empty key list exports every stored paper. Low confidence entries are
    /// preceded by a comment asking the reader to verify them. Requested keys
    /// with no stored paper come back in the second element.
    pub async fn bibliography(&self, keys: &[String]) -> Result<(String, Vec<String>)> {
        let mut papers = self.store.list_recent(usize::MAX).await?;
        let mut missing = Vec::new();
        if !keys.is_empty() {
            let stored: std::collections::HashSet<&str> =
                papers.iter().map(|p| p.citation_key.as_str()).collect();
            missing = keys
                .iter()
                .filter(|k| !stored.contains(k.as_str()))
                .cloned()
                .collect();
            papers.retain(|p| keys.iter().any(|k| k == &p.citation_key));
        }
        papers.sort_by(|a, b| a.citation_key.cmp(&b.citation_key));

        let mut out = String::new();
        for paper in papers {
            if paper.extraction_method.is_low_confidence() {
                out.push_str(&format!(
                    "% metadata from {}, verify before citing\n",
                    paper.extraction_method
                ));
            }
            out.push_str(&paper.bibtex_entry);
            out.push_str("\n\n");
        }
        Ok((out, missing))
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PaperRecord>> {
        Ok(self.store.list_recent(limit).await?)
    }

    /// Copy the ingested file into the library as `{key}.{ext}` next to a
    /// `{key}.bib` holding its entry. No-op when no library is configured.
    async fn archive_paper(&self, source: &Path, paper: &PaperRecord) -> Result<()> {
        let Some(ref library) = self.library else {
            return Ok(());
        };
        tokio::fs::create_dir_all(library).await?;

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdf");
        let target = library.join(format!("{}.{}", paper.citation_key, ext));
        tokio::fs::copy(source, &target).await?;

        let bib_path = library.join(format!("{}.bib", paper.citation_key));
        tokio::fs::write(&bib_path, &paper.bibtex_entry).await?;

        info!(
            citation_key = paper.citation_key,
            path = %target.display(),
            "Archived to library"
        );
        Ok(())
    }

    /// Delete every library file named after the citation key.
    async fn remove_archived(&self, citation_key: &str) -> Result<()> {
        let Some(ref library) = self.library else {
            return Ok(());
        };
        let mut entries = match tokio::fs::read_dir(library).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(citation_key) {
                tokio::fs::remove_file(&path).await?;
                info!(citation_key, path = %path.display(), "Removed from library");
            }
        }
        Ok(())
    }

    /// Keep the archived .bib in sync after a metadata correction.
    async fn rewrite_archived_bib(&self, paper: &PaperRecord) -> Result<()> {
        let Some(ref library) = self.library else {
            return Ok(());
        };
        let bib_path = library.join(format!("{}.bib", paper.citation_key));
        if tokio::fs::try_exists(&bib_path).await? {
            tokio::fs::write(&bib_path, &paper.bibtex_entry).await?;
        }
        Ok(())
    }

    async fn stored_key(&self, content_hash: &str) -> Result<String> {
        let rows = self.store.find_by_hash(content_hash).await?;
        Ok(rows
            .first()
            .map(|r| r.paper.citation_key.clone())
            .unwrap_or_default())
    }
}

/// Keep only the best-ranked chunk of each paper, preserving rank order.
fn dedupe_by_paper(hits: Vec<(ChunkRow, f32)>) -> Vec<(ChunkRow, f32)> {
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|(row, _)| seen.insert(row.paper.content_hash.clone()))
        .collect()
}

fn excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut end = EXCERPT_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn apply_patch(paper: &mut PaperRecord, patch: &MetadataPatch) {
    if let Some(ref title) = patch.title {
        paper.title = title.clone();
    }
    if let Some(ref authors) = patch.authors {
        paper.authors = authors.clone();
    }
    if let Some(year) = patch.year {
        paper.year = year;
    }
    if let Some(ref journal) = patch.journal {
        paper.journal = journal.clone();
    }
    if let Some(ref doi) = patch.doi {
        paper.doi = doi.clone();
    }
    if let Some(ref url) = patch.url {
        paper.url = url.clone();
    }
    if let Some(ref abstract_text) = patch.abstract_text {
        paper.abstract_text = abstract_text.clone();
    }
    if let Some(ref publisher) = patch.publisher {
        paper.publisher = publisher.clone();
    }
    if let Some(ref tags) = patch.tags {
        paper.tags = sanitize_tags(tags);
    }
    if let Some(ref notes) = patch.notes {
        paper.notes = notes.clone();
    }
}

/// Tags are stored comma-joined, so the comma is reserved. Commas become
/// spaces and empty tags are dropped.
fn sanitize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.replace(',', " ").trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn record_to_metadata(paper: &PaperRecord) -> ResolvedMetadata {
    ResolvedMetadata {
        title: paper.title.clone(),
        authors: paper.authors.clone(),
        year: paper.year,
        journal: paper.journal.clone(),
        doi: paper.doi.clone(),
        url: paper.url.clone(),
        abstract_text: paper.abstract_text.clone(),
        publisher: paper.publisher.clone(),
        method: paper.extraction_method,
    }
}

/// Hash a file's bytes the way the pipeline identifies papers.
pub fn content_hash_of(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
