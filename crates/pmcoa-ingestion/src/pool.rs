//! Fixed-size pool of reusable, single-owner resources.
//!
//! Holds one indexer (store connection) per worker slot. Any worker may take
//! any free resource; a resource is never held by two borrowers at once.

use crate::error::QueueError;
use async_channel as chan;
use std::ops::{Deref, DerefMut};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct ResourcePool<T> {
    tx: chan::Sender<T>,
    rx: chan::Receiver<T>,
    capacity: usize,
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Pool owning exactly `items`.
    ///
    /// # Panics
    ///
    /// Panics if `items` is empty.
    pub fn new(items: Vec<T>) -> Self {
        assert!(!items.is_empty(), "resource pool needs at least one item");

        let capacity = items.len();
        let (tx, rx) = chan::bounded(capacity);
        for item in items {
            // Capacity equals the item count, so this cannot fail.
            let _ = tx.try_send(item);
        }

        Self { tx, rx, capacity }
    }

    /// Wait for a free resource.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Pooled<T>, QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            item = self.rx.recv() => item.map_err(|_| QueueError::Closed)?,
        };

        Ok(Pooled {
            item: Some(item),
            home: self.tx.clone(),
        })
    }

    /// Free resources right now.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Resources currently checked out.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until every resource is back, then hand them all over.
    pub async fn drain(self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.capacity);
        while items.len() < self.capacity {
            match self.rx.recv().await {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }
}

/// A checked-out resource. Returned to its pool when dropped.
pub struct Pooled<T> {
    item: Option<T>,
    home: chan::Sender<T>,
}

impl<T> Pooled<T> {
    /// Return the resource to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item present until drop")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item present until drop")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            if self.home.try_send(item).is_err() {
                warn!("Resource pool closed; dropping returned resource");
            }
        }
    }
}
