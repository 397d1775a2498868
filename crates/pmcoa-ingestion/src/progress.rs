//! Progress side channel.
//!
//! Workers report one event per finished job and one when they exit. The
//! aggregator counts them against an a-priori estimate for display only;
//! nothing in the pipeline depends on its numbers.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Emit an info line every this many completed documents.
const LOG_EVERY: u64 = 10_000;

/// How a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerExit {
    /// Received a termination marker.
    Terminated,
    /// Observed cancellation while waiting.
    Cancelled,
    /// Stopped on a store error.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Indexed { worker: usize },
    Skipped { worker: usize },
    WorkerExited { worker: usize, exit: WorkerExit },
}

/// Cloneable handle used by workers. Sending never blocks and never drops
/// events while the aggregator is alive.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            warn!(?event, "Progress aggregator stopped; event lost");
        }
    }

    pub fn indexed(&self, worker: usize) {
        self.send(ProgressEvent::Indexed { worker });
    }

    pub fn skipped(&self, worker: usize) {
        self.send(ProgressEvent::Skipped { worker });
    }

    pub fn exited(&self, worker: usize, exit: WorkerExit) {
        self.send(ProgressEvent::WorkerExited { worker, exit });
    }
}

/// Final counts seen by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub indexed: u64,
    pub skipped: u64,
    pub workers_terminated: usize,
    pub workers_cancelled: usize,
    pub workers_failed: usize,
}

impl ProgressSummary {
    /// Documents that reached a terminal outcome.
    pub fn completed(&self) -> u64 {
        self.indexed + self.skipped
    }

    pub fn workers_exited(&self) -> usize {
        self.workers_terminated + self.workers_cancelled + self.workers_failed
    }

    fn record(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Indexed { .. } => self.indexed += 1,
            ProgressEvent::Skipped { .. } => self.skipped += 1,
            ProgressEvent::WorkerExited { exit, .. } => match exit {
                WorkerExit::Terminated => self.workers_terminated += 1,
                WorkerExit::Cancelled => self.workers_cancelled += 1,
                WorkerExit::Failed => self.workers_failed += 1,
            },
        }
    }
}

/// Counts progress events until every sender is gone.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    estimated_total: u64,
    expected_workers: usize,
    display: bool,
}

impl ProgressAggregator {
    pub fn new(estimated_total: u64, expected_workers: usize) -> Self {
        Self {
            estimated_total,
            expected_workers,
            display: false,
        }
    }

    /// Draw a terminal progress bar.
    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    /// Start the aggregator task.
    ///
    /// The task finishes once the returned sender and all of its clones are
    /// dropped, so it drains every worker's final event before returning.
    pub fn spawn(self) -> (ProgressSender, JoinHandle<ProgressSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(rx));
        (ProgressSender { tx }, handle)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> ProgressSummary {
        let bar = self.progress_bar();
        let mut summary = ProgressSummary::default();

        while let Some(event) = rx.recv().await {
            summary.record(event);
            match event {
                ProgressEvent::Indexed { .. } | ProgressEvent::Skipped { .. } => {
                    bar.inc(1);
                    if summary.completed() % LOG_EVERY == 0 {
                        info!(
                            completed = summary.completed(),
                            estimated = self.estimated_total,
                            skipped = summary.skipped,
                            "Ingestion progress"
                        );
                    }
                }
                ProgressEvent::WorkerExited { worker, exit } => {
                    bar.set_message(format!(
                        "{}/{} workers done",
                        summary.workers_exited(),
                        self.expected_workers
                    ));
                    info!(worker, ?exit, "Worker exited");
                }
            }
        }

        bar.finish_with_message(format!("{} documents", summary.completed()));

        if summary.workers_exited() != self.expected_workers {
            warn!(
                seen = summary.workers_exited(),
                expected = self.expected_workers,
                "Worker exit count does not match pool size"
            );
        }
        summary
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.display {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(self.estimated_total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} Processing jobs [{elapsed_precise}] {wide_bar} {pos}/{len} ({per_sec}, eta {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_every_event_from_every_sender() {
        let (tx, handle) = ProgressAggregator::new(100, 3).spawn();

        let mut senders = Vec::new();
        for worker in 0..3 {
            let tx = tx.clone();
            senders.push(tokio::spawn(async move {
                tx.indexed(worker);
                tx.skipped(worker);
                tx.exited(worker, WorkerExit::Terminated);
            }));
        }
        drop(tx);
        for s in senders {
            s.await.unwrap();
        }

        let summary = handle.await.unwrap();
        assert_eq!(summary.indexed, 3);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.workers_terminated, 3);
        assert_eq!(summary.workers_exited(), 3);
        assert_eq!(summary.completed(), 6);
    }

    #[tokio::test]
    async fn test_exit_kinds_counted_separately() {
        let (tx, handle) = ProgressAggregator::new(0, 3).spawn();
        tx.exited(0, WorkerExit::Terminated);
        tx.exited(1, WorkerExit::Failed);
        tx.exited(2, WorkerExit::Cancelled);
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(
            (summary.workers_terminated, summary.workers_failed, summary.workers_cancelled),
            (1, 1, 1)
        );
        assert_eq!(summary.completed(), 0);
    }

    #[tokio::test]
    async fn test_keeps_draining_after_first_exit() {
        let (tx, handle) = ProgressAggregator::new(10, 2).spawn();
        tx.exited(0, WorkerExit::Terminated);
        tx.indexed(1);
        tx.exited(1, WorkerExit::Terminated);
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.indexed, 1);
        assert_eq!(summary.workers_terminated, 2);
    }
}
