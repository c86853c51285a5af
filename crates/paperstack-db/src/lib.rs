//! Paperstack storage layer.
//!
//! This crate provides an embedded vector store using LanceDB. Papers are
//! stored denormalized: every chunk row carries the full bibliographic
//! record of its paper alongside the chunk text and embedding, so a vector
//! hit never needs a second lookup.
//!
//! # Example
//!
//! ```rust,no_run
//! use paperstack_db::{ChunkStore, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./data/paperstack.lancedb", 1536).await?;
//!     db.initialize().await?;
//!
//!     let store = ChunkStore::new(std::sync::Arc::new(db));
//!     let stats = store.stats().await?;
//!     println!("{} papers, {} chunks", stats.papers, stats.chunks);
//!     Ok(())
//! }
//! ```

pub mod chunks;
pub mod database;
pub mod error;
pub mod schema;
pub mod schema_arrow;

pub use chunks::ChunkStore;
pub use database::Database;
pub use error::{DbError, Result};
pub use schema::{
    ChunkRow, ElementType, ExtractionMethod, PaperRecord, SearchFilter, StoreStats, TABLE_CHUNKS,
};
