use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::types::Update;

/// One update waiting to be handled, together with the bot that owns it.
#[derive(Debug)]
pub struct Job {
    pub update: Update,
    pub bot: Arc<Bot>,
}

impl Job {
    pub fn new(update: Update, bot: Arc<Bot>) -> Self {
        Self { update, bot }
    }
}

#[derive(Debug, Error)]
#[error("job queue is closed")]
pub struct QueueClosed(pub Job);

/// Producer side of the bounded job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

/// Consumer side of the bounded job queue. There is exactly one.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

/// Create a FIFO job queue holding at most `capacity` jobs (at least one).
pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// Enqueue a job, waiting for a free slot while the queue is full.
    pub async fn push(&self, job: Job) -> Result<(), QueueClosed> {
        self.tx.send(job).await.map_err(|e| QueueClosed(e.0))
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Jobs currently buffered.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobReceiver {
    /// Next job in FIFO order. `None` once every producer is gone and the
    /// queue has drained.
    pub async fn pop(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}
