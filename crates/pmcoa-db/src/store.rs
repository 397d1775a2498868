//! Document-store abstraction and the LanceDB backend.

use crate::articles::ArticleRepository;
use crate::database::{Database, DatabaseStats};
use crate::error::{DbError, Result};
use crate::schema::ArticleRecord;
use crate::schema_arrow::article_to_record;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// A document-oriented store that hands out independent connections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open one new connection. Each connection is used by a single task
    /// at a time.
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// One connection to a [`DocumentStore`].
#[async_trait]
pub trait StoreConnection: Send {
    /// Insert a record keyed by `article.id`, or by a store-generated key
    /// when it is `None`. Returns the key used.
    ///
    /// A key that is already present fails with [`DbError::Duplicate`] and
    /// leaves the stored record untouched.
    async fn insert_one(&mut self, article: &ArticleRecord) -> Result<String>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

pub(crate) fn generate_key() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// LanceDB backend
// =============================================================================

/// Appends between compactions. Each append is its own fragment, and rows in
/// uncompacted fragments are not covered by the `id` index.
pub const DEFAULT_COMPACT_EVERY: u64 = 10_000;

/// Embedded LanceDB store: one dataset directory, one table per collection.
pub struct LanceStore {
    path: PathBuf,
    collection: String,
    // Key check and append must not interleave across connections. Guards
    // the number of appends since the last compaction.
    writes: Arc<Mutex<u64>>,
    compact_every: u64,
    admin: Arc<Database>,
}

impl LanceStore {
    /// Open (creating if needed) the dataset at `path` and its collection.
    pub async fn open(path: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let admin = Database::open(path.as_ref()).await?;
        admin.initialize(&collection).await?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            collection,
            writes: Arc::new(Mutex::new(0)),
            compact_every: DEFAULT_COMPACT_EVERY,
            admin: Arc::new(admin),
        })
    }

    /// Compact and reindex after every `n` appends (at least 1).
    pub fn with_compaction_interval(mut self, n: u64) -> Self {
        self.compact_every = n.max(1);
        self
    }

    async fn repository(&self) -> Result<ArticleRepository> {
        ArticleRepository::open(&self.admin, &self.collection).await
    }

    /// Number of stored articles.
    pub async fn count(&self) -> Result<u64> {
        self.repository().await?.count().await
    }

    /// Look up one article by key.
    pub async fn find_by_id(&self, key: &str) -> Result<Option<ArticleRecord>> {
        self.repository().await?.find_by_id(key).await
    }

    /// Row counts for the collection.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        self.admin.stats(&self.collection).await
    }

    /// Whether duplicate checks are backed by an index on `id`.
    pub async fn has_id_index(&self) -> Result<bool> {
        self.admin.has_id_index(&self.collection).await
    }

    /// Build the `id` index if missing and compact the dataset.
    pub async fn optimize(&self) -> Result<()> {
        let _writes = self.writes.lock().await;
        self.admin.ensure_id_index(&self.collection).await?;
        self.admin.optimize().await
    }
}

#[async_trait]
impl DocumentStore for LanceStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let db = Database::open(&self.path)
            .await
            .map_err(|e| DbError::Connection(format!("{}: {e}", self.path.display())))?;
        if !db.table_exists(&self.collection).await? {
            return Err(DbError::CollectionNotFound(self.collection.clone()));
        }
        let repo = ArticleRepository::open(&db, &self.collection).await?;

        Ok(Box::new(LanceConnection {
            repo: Some(repo),
            db: Arc::new(db),
            collection: self.collection.clone(),
            writes: self.writes.clone(),
            compact_every: self.compact_every,
        }))
    }

    fn describe(&self) -> String {
        format!("lancedb://{}/{}", self.path.display(), self.collection)
    }
}

struct LanceConnection {
    repo: Option<ArticleRepository>,
    db: Arc<Database>,
    collection: String,
    writes: Arc<Mutex<u64>>,
    compact_every: u64,
}

impl LanceConnection {
    /// Fold recent appends into the `id` index. Caller holds the write lock.
    async fn compact(&self, repo: &ArticleRepository) -> Result<()> {
        if let Err(e) = self.db.ensure_id_index(&self.collection).await {
            warn!(collection = %self.collection, "Could not build id index: {}", e);
        }
        repo.compact().await
    }
}

#[async_trait]
impl StoreConnection for LanceConnection {
    async fn insert_one(&mut self, article: &ArticleRecord) -> Result<String> {
        let repo = self.repo.as_ref().ok_or(DbError::Closed)?;

        let key = article.id.clone().unwrap_or_else(generate_key);
        let batch = article_to_record(article, &key)?;

        let mut writes = self.writes.lock().await;
        // Generated keys are fresh; only caller-supplied ones can collide.
        if article.id.is_some() && repo.exists(&key).await? {
            return Err(DbError::Duplicate(key));
        }
        repo.append(batch).await?;
        *writes += 1;

        if *writes >= self.compact_every {
            debug!(appends = *writes, "Compacting article collection");
            self.compact(repo).await?;
            *writes = 0;
        }
        drop(writes);

        debug!(id = %key, "Inserted article");
        Ok(key)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.repo.take();
        Ok(())
    }
}
