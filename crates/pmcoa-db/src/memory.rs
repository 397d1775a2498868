//! In-process document store.
//!
//! Same contract as the LanceDB backend, kept in a shared map. All
//! connections from one `MemoryStore` see the same records.

use crate::error::{DbError, Result};
use crate::schema::ArticleRecord;
use crate::store::{generate_key, DocumentStore, StoreConnection};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    records: Mutex<Records>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    max_connections: Option<usize>,
}

#[derive(Default)]
struct Records {
    order: Vec<String>,
    by_key: HashMap<String, ArticleRecord>,
}

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses to open more than `max` connections.
    pub fn with_connection_limit(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_connections: Some(max),
                ..Inner::default()
            }),
        }
    }

    /// All records in insertion order, each with its assigned key.
    pub fn records(&self) -> Vec<ArticleRecord> {
        match self.inner.records.lock() {
            Ok(records) => records
                .order
                .iter()
                .filter_map(|key| records.by_key.get(key).cloned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<ArticleRecord> {
        self.inner.records.lock().ok()?.by_key.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().map(|r| r.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connections_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        let opened = self.inner.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.inner.max_connections {
            if opened >= max {
                self.inner.opened.fetch_sub(1, Ordering::SeqCst);
                return Err(DbError::Connection(format!(
                    "connection limit of {max} reached"
                )));
            }
        }

        Ok(Box::new(MemoryConnection {
            inner: Some(self.inner.clone()),
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

struct MemoryConnection {
    inner: Option<Arc<Inner>>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn insert_one(&mut self, article: &ArticleRecord) -> Result<String> {
        let inner = self.inner.as_ref().ok_or(DbError::Closed)?;
        let mut records = inner
            .records
            .lock()
            .map_err(|_| DbError::Connection("store lock poisoned".to_string()))?;

        let key = article.id.clone().unwrap_or_else(generate_key);
        if records.by_key.contains_key(&key) {
            return Err(DbError::Duplicate(key));
        }

        records.order.push(key.clone());
        records.by_key.insert(key.clone(), article.with_id(key.clone()));
        Ok(key)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
