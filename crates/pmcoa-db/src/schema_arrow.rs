//! Arrow schema and conversion utilities for LanceDB.
//!
//! LanceDB has no nested-document type, so `ref_ids` is stored as a JSON
//! array in a Utf8 column.

use crate::error::{DbError, Result};
use crate::schema::ArticleRecord;
use arrow_array::{Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

// =============================================================================
// Article Arrow Conversion
// =============================================================================

pub fn article_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("pmid", DataType::Int64, false),
        Field::new("pmc", DataType::Int64, false),
        Field::new("ref_ids", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
    ]))
}

/// Build a single-row batch for `article`, stored under `key`.
pub fn article_to_record(article: &ArticleRecord, key: &str) -> Result<RecordBatch> {
    let schema = article_schema();

    let id = StringArray::from(vec![key]);
    let pmid = Int64Array::from(vec![article.pmid]);
    let pmc = Int64Array::from(vec![article.pmc]);
    let ref_ids = StringArray::from(vec![serde_json::to_string(&article.ref_ids)?]);
    let text = StringArray::from(vec![article.text.as_str()]);

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(id) as Arc<dyn Array>,
            Arc::new(pmid),
            Arc::new(pmc),
            Arc::new(ref_ids),
            Arc::new(text),
        ],
    )
    .map_err(|e| DbError::Arrow(e.to_string()))
}

pub fn record_to_article(batch: &RecordBatch, row: usize) -> Result<ArticleRecord> {
    let strings = |col: usize| -> Result<&StringArray> {
        batch
            .column(col)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| DbError::Arrow(format!("column {col} is not Utf8")))
    };
    let ints = |col: usize| -> Result<&Int64Array> {
        batch
            .column(col)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| DbError::Arrow(format!("column {col} is not Int64")))
    };

    Ok(ArticleRecord {
        id: Some(strings(0)?.value(row).to_string()),
        pmid: ints(1)?.value(row),
        pmc: ints(2)?.value(row),
        ref_ids: serde_json::from_str(strings(3)?.value(row))?,
        text: strings(4)?.value(row).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_batch_roundtrip_keeps_key_and_refs() {
        let article = ArticleRecord {
            id: None,
            pmid: 42,
            pmc: -1,
            ref_ids: vec!["B1".to_string(), "B1".to_string(), "B7".to_string()],
            text: "We did X.".to_string(),
        };

        let batch = article_to_record(&article, "generated-key").unwrap();
        assert_eq!(batch.num_rows(), 1);

        let back = record_to_article(&batch, 0).unwrap();
        assert_eq!(back.id.as_deref(), Some("generated-key"));
        assert_eq!(back.ref_ids, article.ref_ids);
        assert_eq!(back.pmid, 42);
    }
}
