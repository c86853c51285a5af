//! Database connection and table management.

use crate::error::Result;
use crate::schema::TABLE_CHUNKS;
use crate::schema_arrow::chunk_schema;
use arrow_array::RecordBatchIterator;
use lancedb::connection::Connection;
use std::path::Path;

/// Main database handle.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
    dim: usize,
}

impl Database {
    /// Open or create a database at the specified path.
    ///
    /// `dim` is the embedding dimension every stored vector must have.
    pub async fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if !path.as_ref().exists() {
            std::fs::create_dir_all(path.as_ref())?;
        }

        let conn = lancedb::connect(&path_str).execute().await?;

        Ok(Self {
            conn,
            path: path_str,
            dim,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Create the chunks table if it doesn't exist.
    ///
    /// LanceDB requires a schema-bearing (possibly empty) batch iterator to
    /// create a table.
    pub async fn initialize(&self) -> Result<()> {
        if !self.table_exists(TABLE_CHUNKS).await? {
            let schema = chunk_schema(self.dim);
            let empty_iter = RecordBatchIterator::new(vec![], schema);
            self.conn
                .create_table(TABLE_CHUNKS, empty_iter)
                .execute()
                .await?;
        }
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let tables = self.conn.table_names().execute().await?;
        Ok(tables.contains(&name.to_string()))
    }

    /// Create a vector index on the chunks table for embedding search.
    ///
    /// Only useful once the table holds enough rows for index training;
    /// small tables are searched by brute force.
    pub async fn create_vector_index(&self) -> Result<()> {
        let table = self.conn.open_table(TABLE_CHUNKS).execute().await?;

        table
            .create_index(&["embedding"], lancedb::index::Index::Auto)
            .execute()
            .await?;

        Ok(())
    }

    /// Optimize the chunks table.
    pub async fn optimize(&self) -> Result<()> {
        let table = self.conn.open_table(TABLE_CHUNKS).execute().await?;
        table
            .optimize(lancedb::table::OptimizeAction::default())
            .await?;
        Ok(())
    }
}
