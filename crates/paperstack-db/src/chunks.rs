//! Chunk store.
//!
//! Gateway for all chunk table operations: paper-level inserts, duplicate
//! probes, citation key enumeration, vector search, and the delete-reinsert
//! rewrite used for metadata corrections.

use crate::database::Database;
use crate::error::{DbError, Result};
use crate::schema::{escape, ChunkRow, PaperRecord, SearchFilter, StoreStats, TABLE_CHUNKS};
use crate::schema_arrow::{distance_at, record_to_row, rows_to_batch};
use futures::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// Store for chunk operations.
#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<Database>,
}

impl ChunkStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn dim(&self) -> usize {
        self.db.dim()
    }

    async fn table(&self) -> Result<lancedb::table::Table> {
        Ok(self
            .db
            .connection()
            .open_table(TABLE_CHUNKS)
            .execute()
            .await?)
    }

    /// Insert all rows of one paper as a single batch.
    ///
    /// The batch lands atomically, so a failure leaves no partial paper
    /// behind.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn insert_rows(&self, rows: &[ChunkRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let table = self.table().await?;
        let batch = rows_to_batch(rows, self.db.dim())?;
        let schema = batch.schema();
        let iter = arrow_array::RecordBatchIterator::new(vec![Ok(batch)], schema);

        table.add(iter).execute().await?;
        Ok(())
    }

    /// Check whether a paper with this content hash is already stored.
    pub async fn exists(&self, content_hash: &str) -> Result<bool> {
        let table = self.table().await?;
        let count = table
            .count_rows(Some(format!("content_hash = '{}'", escape(content_hash))))
            .await?;
        Ok(count > 0)
    }

    /// All citation keys currently in use.
    pub async fn citation_keys(&self) -> Result<HashSet<String>> {
        let table = self.table().await?;
        let mut stream = table.query().execute().await?;

        let mut keys = HashSet::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            let arr = batch
                .column_by_name("citation_key")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::StringArray>())
                .ok_or_else(|| DbError::InvalidQuery("missing citation_key column".to_string()))?;
            for i in 0..batch.num_rows() {
                keys.insert(arr.value(i).to_string());
            }
        }

        Ok(keys)
    }

    /// All chunks of a paper by citation key, in reading order.
    pub async fn find_by_key(&self, citation_key: &str) -> Result<Vec<ChunkRow>> {
        self.find_where(&format!("citation_key = '{}'", escape(citation_key)))
            .await
    }

    /// All chunks of a paper by content hash, in reading order.
    pub async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<ChunkRow>> {
        self.find_where(&format!("content_hash = '{}'", escape(content_hash)))
            .await
    }

    async fn find_where(&self, predicate: &str) -> Result<Vec<ChunkRow>> {
        let table = self.table().await?;
        let mut stream = table.query().only_if(predicate).execute().await?;

        let mut rows = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for i in 0..batch.num_rows() {
                rows.push(record_to_row(&batch, i)?);
            }
        }
        rows.sort_by_key(|r| r.ordinal);

        Ok(rows)
    }

    /// Delete all chunks of a paper, returning how many rows were removed.
    #[instrument(skip(self))]
    pub async fn delete_by_key(&self, citation_key: &str) -> Result<u64> {
        let predicate = format!("citation_key = '{}'", escape(citation_key));
        self.delete_where(&predicate).await
    }

    pub async fn delete_by_hash(&self, content_hash: &str) -> Result<u64> {
        let predicate = format!("content_hash = '{}'", escape(content_hash));
        self.delete_where(&predicate).await
    }

    async fn delete_where(&self, predicate: &str) -> Result<u64> {
        let table = self.table().await?;
        let count = table.count_rows(Some(predicate.to_string())).await? as u64;
        if count > 0 {
            table.delete(predicate).await?;
        }
        Ok(count)
    }

    /// Top-k nearest chunks to the query vector, with distances.
    #[instrument(skip(self, vector, filter))]
    pub async fn query_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<(ChunkRow, f32)>> {
        let table = self.table().await?;

        let mut query = table.vector_search(vector.to_vec())?.limit(k);
        if let Some(predicate) = filter.and_then(|f| f.to_predicate()) {
            query = query.only_if(predicate);
        }

        let mut stream = query.execute().await?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for i in 0..batch.num_rows() {
                let row = record_to_row(&batch, i)?;
                let distance = distance_at(&batch, i).unwrap_or(f32::MAX);
                hits.push((row, distance));
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(hits)
    }

    /// Replace every stored row of a paper with the given rows.
    ///
    /// Used for metadata corrections: the caller patches the embedded
    /// paper record on rows read back from the store, then rewrites.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn rewrite_paper(&self, rows: &[ChunkRow]) -> Result<()> {
        let content_hash = rows
            .first()
            .map(|r| r.paper.content_hash.clone())
            .ok_or_else(|| DbError::InvalidQuery("rewrite with no rows".to_string()))?;

        self.delete_by_hash(&content_hash).await?;
        self.insert_rows(rows).await
    }

    /// Store-wide counts, with papers counted once per content hash.
    pub async fn stats(&self) -> Result<StoreStats> {
        let table = self.table().await?;
        let chunks = table.count_rows(None).await? as u64;

        let mut paper_years: HashMap<String, i64> = HashMap::new();
        let mut stream = table.query().execute().await?;
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            let hashes = batch
                .column_by_name("content_hash")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::StringArray>())
                .ok_or_else(|| DbError::InvalidQuery("missing content_hash column".to_string()))?;
            let years = batch
                .column_by_name("year")
                .and_then(|c| c.as_any().downcast_ref::<arrow_array::Int64Array>())
                .ok_or_else(|| DbError::InvalidQuery("missing year column".to_string()))?;
            for i in 0..batch.num_rows() {
                paper_years.insert(hashes.value(i).to_string(), years.value(i));
            }
        }

        let mut year_histogram = std::collections::BTreeMap::new();
        for year in paper_years.values() {
            *year_histogram.entry(*year).or_insert(0u64) += 1;
        }

        Ok(StoreStats {
            papers: paper_years.len() as u64,
            chunks,
            year_histogram,
            vector_dim: self.db.dim(),
            path: self.db.path().to_string(),
        })
    }

    /// Most recently added papers, newest first, one record per paper.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<PaperRecord>> {
        let table = self.table().await?;
        let mut stream = table.query().execute().await?;

        let mut papers: HashMap<String, PaperRecord> = HashMap::new();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for i in 0..batch.num_rows() {
                let row = record_to_row(&batch, i)?;
                papers
                    .entry(row.paper.content_hash.clone())
                    .or_insert(row.paper);
            }
        }

        let mut records: Vec<PaperRecord> = papers.into_values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);

        Ok(records)
    }
}
