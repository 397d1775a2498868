//! Worker loop.
//!
//! ```text
//! AcquireResource -> AcquireJob -> Processing -> (Indexed | Skipped) -> AcquireResource
//!                         \-> Terminate
//! ```
//!
//! The resource is always returned to the pool, including on exit. A store
//! error ends the worker; the connection stays in the pool for the others.

use crate::error::{IndexError, QueueError, WorkerError};
use crate::indexer::IndexerResource;
use crate::pool::ResourcePool;
use crate::progress::{ProgressSender, WorkerExit};
use crate::queue::{Job, JobReceiver};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one worker did before exiting cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub indexed: u64,
    pub skipped: u64,
    pub exit: WorkerExit,
}

pub struct Worker {
    id: usize,
    jobs: JobReceiver,
    pool: Arc<ResourcePool<IndexerResource>>,
    progress: ProgressSender,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        jobs: JobReceiver,
        pool: Arc<ResourcePool<IndexerResource>>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            jobs,
            pool,
            progress,
            cancel,
        }
    }

    pub async fn run(self) -> Result<WorkerReport, WorkerError> {
        let mut report = WorkerReport {
            worker: self.id,
            indexed: 0,
            skipped: 0,
            exit: WorkerExit::Terminated,
        };
        debug!(worker = self.id, "Worker started");

        loop {
            let mut resource = match self.pool.acquire(&self.cancel).await {
                Ok(r) => r,
                Err(e) => return Ok(self.stop(report, e)),
            };

            let job = match self.jobs.pop().await {
                Ok(job) => job,
                Err(e) => {
                    resource.release();
                    return Ok(self.stop(report, e));
                }
            };

            let raw = match job {
                Job::Terminate => {
                    resource.release();
                    self.progress.exited(self.id, WorkerExit::Terminated);
                    info!(
                        worker = self.id,
                        indexed = report.indexed,
                        skipped = report.skipped,
                        "Worker received termination marker"
                    );
                    return Ok(report);
                }
                Job::Document(raw) => raw,
            };

            let entry = raw.entry.clone();
            match resource.index(raw).await {
                Ok(_) => {
                    resource.release();
                    report.indexed += 1;
                    self.progress.indexed(self.id);
                }
                Err(IndexError::Skip(reason)) => {
                    resource.release();
                    report.skipped += 1;
                    warn!(worker = self.id, entry = %entry, %reason, "Skipping document");
                    self.progress.skipped(self.id);
                }
                Err(IndexError::Fatal(source)) => {
                    resource.release();
                    error!(worker = self.id, entry = %entry, error = %source, "Store write failed; worker stopping");
                    self.progress.exited(self.id, WorkerExit::Failed);
                    return Err(WorkerError::Fatal {
                        worker: self.id,
                        entry,
                        source,
                    });
                }
            }
        }
    }

    fn stop(&self, mut report: WorkerReport, reason: QueueError) -> WorkerReport {
        match reason {
            QueueError::Cancelled => {
                debug!(worker = self.id, "Worker cancelled");
                report.exit = WorkerExit::Cancelled;
            }
            QueueError::Closed => {
                warn!(worker = self.id, "Job channel closed without termination marker");
                report.exit = WorkerExit::Terminated;
            }
        }
        self.progress.exited(self.id, report.exit);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::models::{ParagraphRecord, RawDocument};
    use crate::parser::DocumentParser;
    use crate::progress::ProgressAggregator;
    use crate::queue::job_queue;
    use pmcoa_db::{DocumentStore, MemoryStore};

    /// Parser that reads the pmc id straight from the payload; `skip` is a
    /// document without structure.
    fn payload_parser() -> Arc<dyn DocumentParser> {
        Arc::new(|raw: &str| -> Result<Vec<ParagraphRecord>, ParseError> {
            if raw == "skip" {
                return Err(ParseError::MissingField("text"));
            }
            Ok(vec![ParagraphRecord {
                pmc: raw.parse().ok(),
                section: Some("Body".to_string()),
                text: Some(format!("article {raw}")),
                ..ParagraphRecord::default()
            }])
        })
    }

    async fn pool_of(store: &MemoryStore, n: usize) -> Arc<ResourcePool<IndexerResource>> {
        let mut items = Vec::new();
        for slot in 0..n {
            items.push(IndexerResource::new(slot, store.connect().await.unwrap(), payload_parser()));
        }
        Arc::new(ResourcePool::new(items))
    }

    #[tokio::test]
    async fn test_worker_indexes_skips_and_terminates() {
        let store = MemoryStore::new();
        let pool = pool_of(&store, 1).await;
        let cancel = CancellationToken::new();
        let (tx, rx) = job_queue(4, cancel.clone());
        let (progress, summary) = ProgressAggregator::new(3, 1).spawn();

        let worker = tokio::spawn(Worker::new(0, rx, pool.clone(), progress, cancel).run());
        tx.push(Job::Document(RawDocument::new("1.nxml", "1"))).await.unwrap();
        tx.push(Job::Document(RawDocument::new("s.nxml", "skip"))).await.unwrap();
        tx.push(Job::Document(RawDocument::new("2.nxml", "2"))).await.unwrap();
        tx.push(Job::Terminate).await.unwrap();

        let report = worker.await.unwrap().unwrap();
        assert_eq!((report.indexed, report.skipped), (2, 1));
        assert_eq!(report.exit, WorkerExit::Terminated);
        assert_eq!(pool.available(), 1, "resource returned on every path");

        let summary = summary.await.unwrap();
        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.workers_terminated, 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_stops_worker_but_keeps_connection_pooled() {
        let store = MemoryStore::new();
        let pool = pool_of(&store, 1).await;
        let cancel = CancellationToken::new();
        let (tx, rx) = job_queue(4, cancel.clone());
        let (progress, summary) = ProgressAggregator::new(2, 1).spawn();

        tx.push(Job::Document(RawDocument::new("a.nxml", "7"))).await.unwrap();
        tx.push(Job::Document(RawDocument::new("b.nxml", "7"))).await.unwrap();
        tx.push(Job::Document(RawDocument::new("c.nxml", "8"))).await.unwrap();

        let result = Worker::new(0, rx, pool.clone(), progress, cancel).run().await;
        match result {
            Err(WorkerError::Fatal { entry, source, .. }) => {
                assert_eq!(entry, "b.nxml");
                assert!(source.is_duplicate());
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(tx.len(), 1, "remaining job left for other workers");

        let summary = summary.await.unwrap();
        assert_eq!(summary.workers_failed, 1);
        assert_eq!(summary.indexed, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_job() {
        let store = MemoryStore::new();
        let pool = pool_of(&store, 1).await;
        let cancel = CancellationToken::new();
        let (_tx, rx) = job_queue(1, cancel.clone());
        let (progress, summary) = ProgressAggregator::new(0, 1).spawn();

        let worker = tokio::spawn(Worker::new(0, rx, pool.clone(), progress, cancel.clone()).run());
        tokio::task::yield_now().await;
        cancel.cancel();

        let report = worker.await.unwrap().unwrap();
        assert_eq!(report.exit, WorkerExit::Cancelled);
        assert_eq!(pool.available(), 1);
        assert_eq!(summary.await.unwrap().workers_cancelled, 1);
    }
}
