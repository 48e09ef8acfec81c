//! Hands queued jobs to a fixed pool of workers.
//!
//! Idle workers publish a single-use inbox into a shared pool. The dispatcher
//! drains the job queue and, for each job, spawns a hand-off task that takes
//! the next inbox from the pool and delivers the job into it. The number of
//! hand-offs in flight is capped, so a slow pool eventually stalls the drain
//! loop, which fills the job queue, which stalls the poller.

pub mod queue;
pub mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use queue::{job_queue, Job, JobQueue, JobReceiver, QueueClosed};
pub use worker::{JobSlot, Worker, WorkerHandle, WorkerState};

type IdlePool = Arc<Mutex<mpsc::Receiver<JobSlot>>>;

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    max_workers: usize,
    max_handoffs: usize,
}

/// A running dispatcher and its workers.
#[derive(Debug)]
pub struct DispatcherHandle {
    workers: Vec<WorkerHandle>,
    drain: JoinHandle<()>,
}

impl Dispatcher {
    /// `max_handoffs` bounds how many jobs may be taken off the queue while
    /// still waiting for an idle worker. Both values are clamped to at least one.
    pub fn new(max_workers: usize, max_handoffs: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            max_handoffs: max_handoffs.max(1),
        }
    }

    /// Spawn the worker pool and the drain loop.
    pub fn start(self, jobs: JobReceiver) -> DispatcherHandle {
        let (pool_tx, pool_rx) = mpsc::channel(self.max_workers);
        let workers = (0..self.max_workers)
            .map(|id| Worker::spawn(id, pool_tx.clone()))
            .collect();
        // Only workers hold the pool sender, so the pool closes once they
        // have all stopped.
        drop(pool_tx);

        let pool = Arc::new(Mutex::new(pool_rx));
        let permits = Arc::new(Semaphore::new(self.max_handoffs));
        let drain = tokio::spawn(drain(jobs, pool, permits));

        info!(
            "Dispatcher started with {} workers ({} hand-offs in flight max)",
            self.max_workers, self.max_handoffs
        );

        DispatcherHandle { workers, drain }
    }
}

async fn drain(mut jobs: JobReceiver, pool: IdlePool, permits: Arc<Semaphore>) {
    while let Some(job) = jobs.pop().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            hand_off(job, &pool).await;
            drop(permit);
        });
    }
    debug!("Job queue closed, dispatcher exiting");
}

/// Deliver `job` to exactly one idle worker. Inboxes left behind by stopped
/// workers bounce the job back, and the next inbox is tried.
async fn hand_off(mut job: Job, pool: &Mutex<mpsc::Receiver<JobSlot>>) {
    loop {
        let slot = pool.lock().await.recv().await;
        let Some(slot) = slot else {
            warn!(
                "No workers left, dropping update {}",
                job.update.update_id
            );
            return;
        };
        match slot.send(job) {
            Ok(()) => return,
            Err(bounced) => job = bounced,
        }
    }
}

impl DispatcherHandle {
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Ask every worker to stop. Busy workers finish their current job first.
    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    /// Stop taking jobs off the queue, stop all workers and wait for them.
    /// Jobs already taken off the queue but not yet delivered are dropped.
    pub async fn shutdown(mut self) {
        self.drain.abort();
        self.stop_all();
        for worker in &mut self.workers {
            worker.stopped().await;
        }
        info!("Dispatcher shut down");
    }
}
