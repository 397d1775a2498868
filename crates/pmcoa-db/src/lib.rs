//! pmcoa document store layer
//!
//! This crate persists one canonical record per article. It exposes a small
//! document-store abstraction (insert-by-key with a uniqueness constraint on
//! `_id`) and two backends:
//!
//! - [`LanceStore`]: embedded LanceDB dataset on local disk (no server required)
//! - [`MemoryStore`]: process-local map, used by tests and dry runs
//!
//! Each call to [`DocumentStore::connect`] hands out an independent
//! connection. Connections are not shared between tasks; callers pool them.
//!
//! # Example
//!
//! ```rust,no_run
//! use pmcoa_db::{ArticleRecord, DocumentStore, LanceStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LanceStore::open("./data/biomedical", "PuBMED_Central_Open_Access").await?;
//!     let mut conn = store.connect().await?;
//!
//!     let record = ArticleRecord {
//!         id: Some("pmc12345".to_string()),
//!         pmid: -1,
//!         pmc: 12345,
//!         ref_ids: vec![],
//!         text: "Background info.".to_string(),
//!     };
//!     conn.insert_one(&record).await?;
//!     conn.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod articles;
pub mod database;
pub mod error;
pub mod memory;
pub mod schema;
pub mod schema_arrow;
pub mod store;

pub use articles::ArticleRepository;
pub use database::{Database, DatabaseStats};
pub use error::{DbError, Result};
pub use memory::MemoryStore;
pub use schema::{ArticleRecord, DEFAULT_COLLECTION, DEFAULT_DATABASE, MISSING_ID};
pub use store::{DocumentStore, LanceStore, StoreConnection, DEFAULT_COMPACT_EVERY};
