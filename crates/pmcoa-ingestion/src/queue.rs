//! Bounded job channel between the dispatcher and the workers.
//!
//! A full channel blocks the dispatcher, which caps the number of decoded
//! documents held in memory at the channel capacity.

use crate::error::QueueError;
use crate::models::RawDocument;
use async_channel as chan;
use tokio_util::sync::CancellationToken;

/// Unit of work for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Document(RawDocument),
    /// Tells exactly one worker to exit.
    Terminate,
}

/// Create a channel holding at most `capacity` jobs.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn job_queue(capacity: usize, cancel: CancellationToken) -> (JobSender, JobReceiver) {
    let (tx, rx) = chan::bounded(capacity);
    (
        JobSender {
            tx,
            cancel: cancel.clone(),
        },
        JobReceiver { rx, cancel },
    )
}

#[derive(Debug, Clone)]
pub struct JobSender {
    tx: chan::Sender<Job>,
    cancel: CancellationToken,
}

impl JobSender {
    /// Enqueue a job, waiting while the channel is full.
    ///
    /// Fails with [`QueueError::Closed`] once every receiver has been
    /// dropped and with [`QueueError::Cancelled`] when the run is aborted.
    pub async fn push(&self, job: Job) -> Result<(), QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueueError::Cancelled),
            sent = self.tx.send(job) => sent.map_err(|_| QueueError::Closed),
        }
    }

    /// Jobs currently buffered.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    /// Number of live receivers (one per running worker).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: chan::Receiver<Job>,
    cancel: CancellationToken,
}

impl JobReceiver {
    /// Take the next job, waiting while the channel is empty.
    pub async fn pop(&self) -> Result<Job, QueueError> {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueueError::Cancelled),
            job = self.rx.recv() => job.map_err(|_| QueueError::Closed),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn doc(n: usize) -> Job {
        Job::Document(RawDocument::new(format!("{n}.nxml"), format!("<article>{n}</article>")))
    }

    #[tokio::test]
    async fn test_push_blocks_when_full() {
        let (tx, rx) = job_queue(2, CancellationToken::new());
        tx.push(doc(1)).await.unwrap();
        tx.push(doc(2)).await.unwrap();
        assert_eq!(tx.len(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.push(doc(3))).await;
        assert!(blocked.is_err(), "push into a full channel must wait");
        assert_eq!(tx.len(), 2);

        assert_eq!(rx.pop().await.unwrap(), doc(1));
        tx.push(doc(3)).await.unwrap();
        assert!(tx.len() <= tx.capacity());
    }

    #[test]
    fn test_push_wakes_pending_pop() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let (tx, rx) = job_queue(1, CancellationToken::new());
        let mut pop = task::spawn(rx.pop());
        assert_pending!(pop.poll());

        let mut push = task::spawn(tx.push(Job::Terminate));
        assert_ready_eq!(push.poll(), Ok(()));
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), Ok(Job::Terminate));
    }

    #[tokio::test]
    async fn test_terminate_is_distinct_from_empty_document() {
        let (tx, rx) = job_queue(2, CancellationToken::new());
        tx.push(Job::Document(RawDocument::new("empty.nxml", ""))).await.unwrap();
        tx.push(Job::Terminate).await.unwrap();

        assert!(matches!(rx.pop().await.unwrap(), Job::Document(d) if d.text.is_empty()));
        assert_eq!(rx.pop().await.unwrap(), Job::Terminate);
    }

    #[tokio::test]
    async fn test_cancel_wakes_blocked_pop_and_push() {
        let cancel = CancellationToken::new();
        let (tx, rx) = job_queue(1, cancel.clone());

        let waiter = tokio::spawn(async move { rx.pop().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(QueueError::Cancelled));

        assert_eq!(tx.push(doc(1)).await, Err(QueueError::Cancelled));
    }

    #[tokio::test]
    async fn test_push_fails_when_all_receivers_gone() {
        let (tx, rx) = job_queue(1, CancellationToken::new());
        drop(rx);
        assert_eq!(tx.receiver_count(), 0);
        assert_eq!(tx.push(doc(1)).await, Err(QueueError::Closed));
    }
}
