//! Assembly of store rows from pipeline outputs.

use crate::document::RawChunk;
use crate::error::{IngestError, Result};
use paperstack_db::{ChunkRow, PaperRecord};

/// Pair chunks with their vectors and stamp each row with the paper record.
///
/// Ordinals follow the chunk order the converter produced, which is the
/// document's reading order.
pub fn build_chunk_rows(
    chunks: &[RawChunk],
    vectors: Vec<Vec<f32>>,
    paper: &PaperRecord,
) -> Result<Vec<ChunkRow>> {
    if chunks.len() != vectors.len() {
        return Err(IngestError::Schema(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }

    Ok(chunks
        .iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (chunk, embedding))| ChunkRow {
            chunk_id: format!("{}-{:04}", paper.content_hash, i),
            ordinal: i as i64,
            text: chunk.text.clone(),
            section_title: chunk.section_title.clone(),
            section_hierarchy: chunk.section_hierarchy.clone(),
            page: chunk.page,
            element_type: chunk.element_type,
            paper: paper.clone(),
            embedding,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperstack_db::{ElementType, ExtractionMethod};

    fn paper() -> PaperRecord {
        PaperRecord {
            content_hash: "deadbeef".to_string(),
            title: "T".to_string(),
            authors: vec!["A B".to_string()],
            year: 2024,
            journal: None,
            doi: None,
            url: None,
            abstract_text: None,
            publisher: None,
            citation_key: "B2024".to_string(),
            bibtex_entry: "@article{B2024,\n  title = {T}\n}".to_string(),
            extraction_method: ExtractionMethod::HeuristicParse,
            created_at: chrono::Utc::now(),
            tags: Vec::new(),
            notes: String::new(),
        }
    }

    fn chunk(text: &str) -> RawChunk {
        RawChunk {
            text: text.to_string(),
            section_title: None,
            section_hierarchy: Vec::new(),
            page: None,
            element_type: ElementType::Paragraph,
        }
    }

    #[test]
    fn rows_carry_ordinals_and_ids() {
        let chunks = vec![chunk("one"), chunk("two"), chunk("three")];
        let vectors = vec![vec![1.0], vec![2.0], vec![3.0]];
        let rows = build_chunk_rows(&chunks, vectors, &paper()).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].chunk_id, "deadbeef-0000");
        assert_eq!(rows[2].chunk_id, "deadbeef-0002");
        assert_eq!(rows[1].ordinal, 1);
        assert_eq!(rows[1].text, "two");
        assert!(rows.iter().all(|r| r.paper.citation_key == "B2024"));
    }

    #[test]
    fn count_mismatch_is_a_schema_error() {
        let err = build_chunk_rows(&[chunk("one")], vec![], &paper()).unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
    }
}
