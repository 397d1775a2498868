//! Article repository.
//!
//! Insert and lookup operations on the article collection.

use crate::database::Database;
use crate::error::Result;
use crate::schema::ArticleRecord;
use crate::schema_arrow::record_to_article;
use arrow_array::{RecordBatch, RecordBatchIterator};
use futures::StreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::OptimizeAction;
use lancedb::Table;

/// Repository for article operations on one collection.
///
/// Holds an open table handle; the connection is opened with strong read
/// consistency so every query sees the latest committed version.
#[derive(Clone)]
pub struct ArticleRepository {
    table: Table,
}

impl ArticleRepository {
    pub async fn open(db: &Database, collection: &str) -> Result<Self> {
        let table = db.connection().open_table(collection).execute().await?;
        Ok(Self { table })
    }

    /// Append a prepared batch (see `article_to_record`). Does not check
    /// for duplicates.
    pub async fn append(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let iter = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table.add(iter).execute().await?;
        Ok(())
    }

    /// Whether a row with this key exists. Served by the `id` index for
    /// compacted fragments.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let count = self.table.count_rows(Some(key_filter(key))).await?;
        Ok(count > 0)
    }

    /// Find an article by key.
    pub async fn find_by_id(&self, key: &str) -> Result<Option<ArticleRecord>> {
        let mut stream = self.table.query().only_if(key_filter(key)).execute().await?;

        if let Some(batch) = stream.next().await {
            let batch = batch?;
            if batch.num_rows() > 0 {
                return Ok(Some(record_to_article(&batch, 0)?));
            }
        }

        Ok(None)
    }

    /// Count stored articles.
    pub async fn count(&self) -> Result<u64> {
        Ok(self.table.count_rows(None).await? as u64)
    }

    /// Merge small append fragments and fold new rows into the indices.
    pub async fn compact(&self) -> Result<()> {
        self.table.optimize(OptimizeAction::All).await?;
        Ok(())
    }
}

fn key_filter(key: &str) -> String {
    format!("id = '{}'", key.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_filter_escapes_quotes() {
        assert_eq!(key_filter("pmc1"), "id = 'pmc1'");
        assert_eq!(key_filter("o'brien"), "id = 'o''brien'");
    }
}
