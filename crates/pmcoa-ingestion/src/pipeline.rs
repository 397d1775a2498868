//! End-to-end ingestion run.
//!
//! Orchestrates one run over a set of archives:
//!   1. Open one store connection per worker and pool them
//!   2. Start the progress aggregator and the workers
//!   3. Read each archive lazily and push documents onto the job channel
//!      (blocks while the channel is full)
//!   4. Push one termination marker per worker
//!   5. Join workers and the aggregator, then close every connection
//!
//! A failing archive is recorded and the run moves on to the next one. A
//! failing worker is recorded; the survivors keep draining the channel.

use crate::archive::ArchiveReader;
use crate::error::{ArchiveError, PipelineError, QueueError, WorkerError};
use crate::indexer::IndexerResource;
use crate::parser::DocumentParser;
use crate::pool::ResourcePool;
use crate::progress::{ProgressAggregator, ProgressSummary};
use crate::queue::{job_queue, Job, JobSender};
use crate::worker::{Worker, WorkerReport};
use pmcoa_db::DocumentStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Share of logical CPUs given to workers by default.
pub const DEFAULT_WORKER_FRACTION: f64 = 0.7;

/// Estimated number of articles in the full Open Access subset.
pub const DEFAULT_ESTIMATED_TOTAL: u64 = 30_000_000;

/// `fraction` of the logical CPUs, at least one.
pub fn worker_count_for(fraction: f64) -> usize {
    ((num_cpus::get() as f64 * fraction) as usize).max(1)
}

/// Default worker count: 70% of logical CPUs, at least one.
pub fn default_worker_count() -> usize {
    worker_count_for(DEFAULT_WORKER_FRACTION)
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Worker tasks, and store connections in the pool.
    pub workers: usize,
    /// Maximum jobs buffered between the dispatcher and the workers.
    pub job_capacity: usize,
    /// Expected document count, for the progress display only.
    pub estimated_total: u64,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// `workers` workers with a job channel of the same capacity.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            job_capacity: workers,
            estimated_total: DEFAULT_ESTIMATED_TOTAL,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".to_string()));
        }
        if self.job_capacity == 0 {
            return Err(PipelineError::Config("job_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_workers(default_worker_count())
    }
}

// ── Result summary ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFailure {
    pub archive: PathBuf,
    /// Documents pushed from this archive before it failed.
    pub dispatched: u64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub archives_completed: usize,
    pub documents_dispatched: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub archive_failures: Vec<ArchiveFailure>,
    pub worker_failures: Vec<String>,
    pub workers: Vec<WorkerReport>,
    pub progress: ProgressSummary,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.archive_failures.is_empty() && self.worker_failures.is_empty() && !self.cancelled
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Why dispatching one archive stopped early.
enum DispatchStop {
    Archive(ArchiveError),
    Queue(QueueError),
    Panicked(String),
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn DocumentStore>,
    parser: Arc<dyn DocumentParser>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DocumentStore>,
        parser: Arc<dyn DocumentParser>,
    ) -> Self {
        Self {
            config,
            store,
            parser,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` to abort the run early. Every blocking point observes it.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ingest every archive in order and wait for all workers to finish.
    #[instrument(skip_all, fields(workers = self.config.workers, archives = archives.len()))]
    pub async fn run(&self, archives: &[PathBuf]) -> Result<RunSummary, PipelineError> {
        self.config.validate()?;
        let t0 = std::time::Instant::now();
        let workers = self.config.workers;

        let resources = self.open_resources().await?;
        let pool = Arc::new(ResourcePool::new(resources));
        info!(
            workers,
            job_capacity = self.config.job_capacity,
            store = %self.store.describe(),
            "Starting ingestion run"
        );

        let (progress, aggregator) = ProgressAggregator::new(self.config.estimated_total, workers)
            .with_display(self.config.show_progress)
            .spawn();
        let (jobs, job_rx) = job_queue(self.config.job_capacity, self.cancel.clone());

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    job_rx.clone(),
                    pool.clone(),
                    progress.clone(),
                    self.cancel.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();
        // Workers hold the only receivers and progress senders from here on.
        drop(job_rx);
        drop(progress);

        let mut summary = RunSummary {
            archives_completed: 0,
            documents_dispatched: 0,
            indexed: 0,
            skipped: 0,
            archive_failures: Vec::new(),
            worker_failures: Vec::new(),
            workers: Vec::new(),
            progress: ProgressSummary::default(),
            cancelled: false,
            duration_ms: 0,
        };

        let mut workers_gone = false;
        for archive in archives {
            let (dispatched, stop) = self.dispatch_archive(archive, &jobs).await;
            summary.documents_dispatched += dispatched;

            match stop {
                None => {
                    summary.archives_completed += 1;
                    info!(archive = %archive.display(), dispatched, "Archive dispatched");
                }
                Some(DispatchStop::Queue(QueueError::Cancelled)) => {
                    warn!(archive = %archive.display(), "Run cancelled during dispatch");
                    break;
                }
                Some(DispatchStop::Queue(QueueError::Closed)) => {
                    error!(archive = %archive.display(), "All workers have exited; stopping dispatch");
                    workers_gone = true;
                    break;
                }
                Some(DispatchStop::Archive(e)) => {
                    error!(archive = %archive.display(), dispatched, error = %e, "Archive aborted");
                    summary.archive_failures.push(ArchiveFailure {
                        archive: archive.clone(),
                        dispatched,
                        error: e.to_string(),
                    });
                }
                Some(DispatchStop::Panicked(msg)) => {
                    error!(archive = %archive.display(), "Archive reader panicked: {}", msg);
                    summary.archive_failures.push(ArchiveFailure {
                        archive: archive.clone(),
                        dispatched,
                        error: msg,
                    });
                }
            }
        }

        if !workers_gone {
            self.send_termination(&jobs, workers).await;
        }
        drop(jobs);

        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(report)) => summary.workers.push(report),
                Ok(Err(e)) => summary.worker_failures.push(e.to_string()),
                Err(e) => {
                    let e = WorkerError::Panicked {
                        worker,
                        message: e.to_string(),
                    };
                    error!("{}", e);
                    summary.worker_failures.push(e.to_string());
                }
            }
        }

        summary.progress = match aggregator.await {
            Ok(p) => p,
            Err(e) => {
                warn!("Progress aggregator failed: {}", e);
                ProgressSummary::default()
            }
        };
        summary.indexed = summary.progress.indexed;
        summary.skipped = summary.progress.skipped;
        summary.cancelled = self.cancel.is_cancelled();

        self.close_resources(pool).await;

        summary.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            archives = summary.archives_completed,
            dispatched = summary.documents_dispatched,
            indexed = summary.indexed,
            skipped = summary.skipped,
            archive_failures = summary.archive_failures.len(),
            worker_failures = summary.worker_failures.len(),
            duration_ms = summary.duration_ms,
            "Ingestion run complete"
        );

        Ok(summary)
    }

    async fn open_resources(&self) -> Result<Vec<IndexerResource>, PipelineError> {
        let mut resources = Vec::with_capacity(self.config.workers);
        for slot in 0..self.config.workers {
            match self.store.connect().await {
                Ok(conn) => resources.push(IndexerResource::new(slot, conn, self.parser.clone())),
                Err(source) => {
                    for r in resources {
                        if let Err(e) = r.close().await {
                            warn!("Failed to close connection after setup error: {}", e);
                        }
                    }
                    return Err(PipelineError::Store { slot, source });
                }
            }
        }
        Ok(resources)
    }

    /// Read one archive on the blocking pool, pushing each document as it
    /// is decoded. Returns the number pushed and why it stopped, if early.
    #[instrument(skip(self, jobs), fields(archive = %path.display()))]
    async fn dispatch_archive(&self, path: &Path, jobs: &JobSender) -> (u64, Option<DispatchStop>) {
        let path = path.to_path_buf();
        let jobs = jobs.clone();
        let runtime = tokio::runtime::Handle::current();
        // Shared so the count survives a panicking reader.
        let dispatched = Arc::new(AtomicU64::new(0));
        let counter = dispatched.clone();

        let task = tokio::task::spawn_blocking(move || -> Result<(), DispatchStop> {
            let mut reader = ArchiveReader::open(&path).map_err(DispatchStop::Archive)?;
            let documents = reader.documents().map_err(DispatchStop::Archive)?;

            for doc in documents {
                let doc = doc.map_err(DispatchStop::Archive)?;
                runtime
                    .block_on(jobs.push(Job::Document(doc)))
                    .map_err(DispatchStop::Queue)?;
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        });

        let stop = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(stop)) => Some(stop),
            Err(e) => Some(DispatchStop::Panicked(e.to_string())),
        };
        (dispatched.load(Ordering::Relaxed), stop)
    }

    async fn send_termination(&self, jobs: &JobSender, workers: usize) {
        for sent in 0..workers {
            match jobs.push(Job::Terminate).await {
                Ok(()) => {}
                Err(QueueError::Closed) => {
                    debug!(sent, "No workers left to terminate");
                    return;
                }
                Err(QueueError::Cancelled) => {
                    debug!(sent, "Cancelled while sending termination markers");
                    return;
                }
            }
        }
    }

    async fn close_resources(&self, pool: Arc<ResourcePool<IndexerResource>>) {
        let pool = match Arc::try_unwrap(pool) {
            Ok(pool) => pool,
            Err(_) => {
                warn!("Resource pool still shared at shutdown; connections left open");
                return;
            }
        };

        for resource in pool.drain().await {
            let slot = resource.slot();
            let indexed = resource.indexed();
            if let Err(e) = resource.close().await {
                warn!(slot, "Failed to close store connection: {}", e);
            } else {
                debug!(slot, indexed, "Closed store connection");
            }
        }
    }
}
