//! Arrow conversion for the denormalized chunks table.
//!
//! LanceDB stores Arrow record batches. One batch carries all rows of a
//! paper so an insert is all-or-nothing. Reads go through `column_by_name`
//! because vector search appends a `_distance` column to result batches.

use crate::error::{DbError, Result};
use crate::schema::{ChunkRow, ElementType, ExtractionMethod, PaperRecord};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Arrow schema of the chunks table for a given embedding dimension.
pub fn chunk_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("ordinal", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("section_title", DataType::Utf8, true),
        Field::new("section_hierarchy", DataType::Utf8, true),
        Field::new("page", DataType::Int64, true),
        Field::new("element_type", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("authors", DataType::Utf8, false),
        Field::new("year", DataType::Int64, false),
        Field::new("journal", DataType::Utf8, true),
        Field::new("doi", DataType::Utf8, true),
        Field::new("url", DataType::Utf8, true),
        Field::new("abstract_text", DataType::Utf8, true),
        Field::new("publisher", DataType::Utf8, true),
        Field::new("citation_key", DataType::Utf8, false),
        Field::new("bibtex_entry", DataType::Utf8, false),
        Field::new("extraction_method", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("tags", DataType::Utf8, true),
        Field::new("notes", DataType::Utf8, true),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dim as i32,
            ),
            false,
        ),
    ]))
}

/// Convert a slice of chunk rows into a single record batch.
pub fn rows_to_batch(rows: &[ChunkRow], dim: usize) -> Result<RecordBatch> {
    for row in rows {
        if row.embedding.len() != dim {
            return Err(DbError::InvalidEmbeddingDimension {
                expected: dim,
                actual: row.embedding.len(),
            });
        }
    }

    let schema = chunk_schema(dim);

    let chunk_id: StringArray = rows.iter().map(|r| Some(r.chunk_id.as_str())).collect();
    let content_hash: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.content_hash.as_str()))
        .collect();
    let ordinal = Int64Array::from(rows.iter().map(|r| r.ordinal).collect::<Vec<_>>());
    let text: StringArray = rows.iter().map(|r| Some(r.text.as_str())).collect();
    let section_title: StringArray = rows.iter().map(|r| r.section_title.as_deref()).collect();
    let section_hierarchy: StringArray = rows
        .iter()
        .map(|r| {
            if r.section_hierarchy.is_empty() {
                None
            } else {
                Some(r.section_hierarchy.join(" > "))
            }
        })
        .collect();
    let page = Int64Array::from(rows.iter().map(|r| r.page).collect::<Vec<_>>());
    let element_type: StringArray = rows
        .iter()
        .map(|r| Some(r.element_type.as_str()))
        .collect();
    let title: StringArray = rows.iter().map(|r| Some(r.paper.title.as_str())).collect();
    // " and " is the BibTeX author separator and is reserved: a name
    // containing it will come back as two authors.
    let authors: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.authors.join(" and ")))
        .collect();
    let year = Int64Array::from(rows.iter().map(|r| r.paper.year).collect::<Vec<_>>());
    let journal: StringArray = rows.iter().map(|r| r.paper.journal.as_deref()).collect();
    let doi: StringArray = rows.iter().map(|r| r.paper.doi.as_deref()).collect();
    let url: StringArray = rows.iter().map(|r| r.paper.url.as_deref()).collect();
    let abstract_text: StringArray = rows
        .iter()
        .map(|r| r.paper.abstract_text.as_deref())
        .collect();
    let publisher: StringArray = rows.iter().map(|r| r.paper.publisher.as_deref()).collect();
    let citation_key: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.citation_key.as_str()))
        .collect();
    let bibtex_entry: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.bibtex_entry.as_str()))
        .collect();
    let extraction_method: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.extraction_method.as_str()))
        .collect();
    let created_at: StringArray = rows
        .iter()
        .map(|r| Some(r.paper.created_at.to_rfc3339()))
        .collect();
    let tags: StringArray = rows
        .iter()
        .map(|r| {
            if r.paper.tags.is_empty() {
                None
            } else {
                // Comma-joined; the pipeline strips commas out of tags
                // before they reach the store.
                Some(r.paper.tags.join(","))
            }
        })
        .collect();
    let notes: StringArray = rows
        .iter()
        .map(|r| {
            if r.paper.notes.is_empty() {
                None
            } else {
                Some(r.paper.notes.as_str().to_string())
            }
        })
        .collect();

    let flat: Vec<f32> = rows.iter().flat_map(|r| r.embedding.iter().copied()).collect();
    let embedding = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, false)),
        dim as i32,
        Arc::new(Float32Array::from(flat)),
        None,
    )
    .map_err(|e| DbError::Arrow(e.to_string()))?;

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(chunk_id) as Arc<dyn Array>,
            Arc::new(content_hash),
            Arc::new(ordinal),
            Arc::new(text),
            Arc::new(section_title),
            Arc::new(section_hierarchy),
            Arc::new(page),
            Arc::new(element_type),
            Arc::new(title),
            Arc::new(authors),
            Arc::new(year),
            Arc::new(journal),
            Arc::new(doi),
            Arc::new(url),
            Arc::new(abstract_text),
            Arc::new(publisher),
            Arc::new(citation_key),
            Arc::new(bibtex_entry),
            Arc::new(extraction_method),
            Arc::new(created_at),
            Arc::new(tags),
            Arc::new(notes),
            Arc::new(embedding),
        ],
    )
    .map_err(|e| DbError::Arrow(e.to_string()))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| DbError::InvalidQuery(format!("missing string column: {}", name)))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| DbError::InvalidQuery(format!("missing int column: {}", name)))
}

fn get_string(batch: &RecordBatch, name: &str, row: usize) -> Result<String> {
    Ok(string_column(batch, name)?.value(row).to_string())
}

fn get_opt_string(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<String>> {
    let arr = string_column(batch, name)?;
    if arr.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(arr.value(row).to_string()))
    }
}

fn get_i64(batch: &RecordBatch, name: &str, row: usize) -> Result<i64> {
    Ok(int_column(batch, name)?.value(row))
}

fn get_opt_i64(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<i64>> {
    let arr = int_column(batch, name)?;
    if arr.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(arr.value(row)))
    }
}

fn get_embedding(batch: &RecordBatch, row: usize) -> Result<Vec<f32>> {
    let list = batch
        .column_by_name("embedding")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| DbError::InvalidQuery("missing embedding column".to_string()))?;
    let values = list.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| DbError::InvalidQuery("embedding items are not f32".to_string()))?;
    Ok(floats.values().to_vec())
}

/// Distance of a vector search hit, when present in the batch.
pub fn distance_at(batch: &RecordBatch, row: usize) -> Option<f32> {
    let arr = batch
        .column_by_name("_distance")?
        .as_any()
        .downcast_ref::<Float32Array>()?;
    if arr.is_null(row) {
        None
    } else {
        Some(arr.value(row))
    }
}

/// Convert one row of a result batch back into a chunk row.
pub fn record_to_row(batch: &RecordBatch, row: usize) -> Result<ChunkRow> {
    let method_str = get_string(batch, "extraction_method", row)?;
    let extraction_method = ExtractionMethod::parse(&method_str)
        .ok_or_else(|| DbError::InvalidQuery(format!("unknown extraction method: {}", method_str)))?;

    let element_str = get_string(batch, "element_type", row)?;
    let element_type = ElementType::parse(&element_str)
        .ok_or_else(|| DbError::InvalidQuery(format!("unknown element type: {}", element_str)))?;

    let authors = get_string(batch, "authors", row)?
        .split(" and ")
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let section_hierarchy = get_opt_string(batch, "section_hierarchy", row)?
        .map(|s| s.split(" > ").map(str::to_string).collect())
        .unwrap_or_default();
    let tags = get_opt_string(batch, "tags", row)?
        .map(|s| s.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let paper = PaperRecord {
        content_hash: get_string(batch, "content_hash", row)?,
        title: get_string(batch, "title", row)?,
        authors,
        year: get_i64(batch, "year", row)?,
        journal: get_opt_string(batch, "journal", row)?,
        doi: get_opt_string(batch, "doi", row)?,
        url: get_opt_string(batch, "url", row)?,
        abstract_text: get_opt_string(batch, "abstract_text", row)?,
        publisher: get_opt_string(batch, "publisher", row)?,
        citation_key: get_string(batch, "citation_key", row)?,
        bibtex_entry: get_string(batch, "bibtex_entry", row)?,
        extraction_method,
        created_at: chrono::DateTime::parse_from_rfc3339(&get_string(batch, "created_at", row)?)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        tags,
        notes: get_opt_string(batch, "notes", row)?.unwrap_or_default(),
    };

    Ok(ChunkRow {
        chunk_id: get_string(batch, "chunk_id", row)?,
        ordinal: get_i64(batch, "ordinal", row)?,
        text: get_string(batch, "text", row)?,
        section_title: get_opt_string(batch, "section_title", row)?,
        section_hierarchy,
        page: get_opt_i64(batch, "page", row)?,
        element_type,
        paper,
        embedding: get_embedding(batch, row)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(ordinal: i64) -> ChunkRow {
        let paper = PaperRecord {
            content_hash: "abc123".to_string(),
            title: "Attention Is All You Need".to_string(),
            authors: vec!["Ashish Vaswani".to_string(), "Noam Shazeer".to_string()],
            year: 2017,
            journal: Some("NeurIPS".to_string()),
            doi: Some("10.5555/3295222".to_string()),
            url: None,
            abstract_text: Some("The dominant sequence transduction models...".to_string()),
            publisher: None,
            citation_key: "Vaswani2017".to_string(),
            bibtex_entry: "@article{Vaswani2017, ...}".to_string(),
            extraction_method: ExtractionMethod::ExternalLookupDoi,
            created_at: chrono::Utc::now(),
            tags: vec!["nlp".to_string(), "transformers".to_string()],
            notes: String::new(),
        };
        ChunkRow {
            chunk_id: format!("abc123-{:04}", ordinal),
            ordinal,
            text: format!("chunk number {}", ordinal),
            section_title: Some("Introduction".to_string()),
            section_hierarchy: vec!["1 Introduction".to_string(), "1.1 Background".to_string()],
            page: Some(2),
            element_type: ElementType::Paragraph,
            paper,
            embedding: vec![0.5, 0.5, 0.5, 0.5],
        }
    }

    #[test]
    fn rows_round_trip_through_arrow() {
        let rows = vec![sample_row(0), sample_row(1)];
        let batch = rows_to_batch(&rows, 4).unwrap();
        assert_eq!(batch.num_rows(), 2);

        for (i, original) in rows.iter().enumerate() {
            let back = record_to_row(&batch, i).unwrap();
            assert_eq!(back.chunk_id, original.chunk_id);
            assert_eq!(back.ordinal, original.ordinal);
            assert_eq!(back.text, original.text);
            assert_eq!(back.section_hierarchy, original.section_hierarchy);
            assert_eq!(back.page, original.page);
            assert_eq!(back.paper.authors, original.paper.authors);
            assert_eq!(back.paper.citation_key, original.paper.citation_key);
            assert_eq!(back.paper.tags, original.paper.tags);
            assert_eq!(back.embedding, original.embedding);
            assert_eq!(
                back.paper.extraction_method,
                original.paper.extraction_method
            );
        }
    }

    #[test]
    fn empty_optionals_round_trip_as_empty() {
        let mut row = sample_row(0);
        row.section_title = None;
        row.section_hierarchy = Vec::new();
        row.page = None;
        row.paper.tags = Vec::new();
        row.paper.journal = None;

        let batch = rows_to_batch(&[row], 4).unwrap();
        let back = record_to_row(&batch, 0).unwrap();
        assert_eq!(back.section_title, None);
        assert!(back.section_hierarchy.is_empty());
        assert_eq!(back.page, None);
        assert!(back.paper.tags.is_empty());
        assert_eq!(back.paper.journal, None);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let row = sample_row(0);
        let err = rows_to_batch(&[row], 8).unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidEmbeddingDimension {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn distance_is_absent_from_plain_batches() {
        let batch = rows_to_batch(&[sample_row(0)], 4).unwrap();
        assert_eq!(distance_at(&batch, 0), None);
    }
}
