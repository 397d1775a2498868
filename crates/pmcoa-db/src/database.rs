//! Database connection and table management.
//!
//! Provides a unified interface for LanceDB operations.

use crate::error::Result;
use crate::schema_arrow::article_schema;
use arrow_array::RecordBatchIterator;
use lancedb::connection::Connection;
use lancedb::index::scalar::BTreeIndexBuilder;
use lancedb::index::Index;
use std::path::Path;
use std::time::Duration;

/// Main database handle.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
}

impl Database {
    /// Open or create a database at the specified path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if !path.as_ref().exists() {
            std::fs::create_dir_all(path.as_ref())?;
        }

        // Every read checks for newer versions so connections see each other's appends.
        let conn = lancedb::connect(&path_str)
            .read_consistency_interval(Duration::ZERO)
            .execute()
            .await?;

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the article collection if it does not exist yet.
    ///
    /// LanceDB requires a schema to create a table, so an empty batch
    /// iterator carrying the article schema is used.
    pub async fn initialize(&self, collection: &str) -> Result<()> {
        if !self.table_exists(collection).await? {
            let empty_iter = RecordBatchIterator::new(vec![], article_schema());
            self.conn
                .create_table(collection, empty_iter)
                .execute()
                .await?;
            tracing::info!(collection, path = %self.path, "Created article collection");
        }

        // An empty table may refuse a scalar index; the next optimize retries.
        if let Err(e) = self.ensure_id_index(collection).await {
            tracing::warn!(collection, "Could not build id index yet: {}", e);
        }
        Ok(())
    }

    /// Build the BTree index on `id` used by duplicate checks, if missing.
    pub async fn ensure_id_index(&self, collection: &str) -> Result<()> {
        if self.has_id_index(collection).await? {
            return Ok(());
        }

        let table = self.conn.open_table(collection).execute().await?;
        table
            .create_index(&["id"], Index::BTree(BTreeIndexBuilder::default()))
            .execute()
            .await?;
        tracing::info!(collection, "Created id index");
        Ok(())
    }

    pub async fn has_id_index(&self, collection: &str) -> Result<bool> {
        let table = self.conn.open_table(collection).execute().await?;
        let indices = table.list_indices().await?;
        Ok(indices.iter().any(|i| i.columns.iter().any(|c| c == "id")))
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let tables = self.conn.table_names().execute().await?;
        Ok(tables.iter().any(|t| t == name))
    }

    /// Compact every table.
    pub async fn optimize(&self) -> Result<()> {
        let tables = self.conn.table_names().execute().await?;

        for table_name in tables {
            let table = self.conn.open_table(&table_name).execute().await?;
            table.optimize(lancedb::table::OptimizeAction::default()).await?;
        }

        Ok(())
    }

    /// Get table statistics.
    pub async fn stats(&self, collection: &str) -> Result<DatabaseStats> {
        let articles = if self.table_exists(collection).await? {
            let table = self.conn.open_table(collection).execute().await?;
            table.count_rows(None).await? as u64
        } else {
            0
        };

        Ok(DatabaseStats { articles })
    }
}

/// Database statistics.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    pub articles: u64,
}
