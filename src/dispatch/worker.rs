use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::dispatch::queue::Job;

/// A worker's single-use inbox, published to the idle pool while it waits.
pub type JobSlot = oneshot::Sender<Job>;

/// Worker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Idle: inbox published, waiting for a job or a stop request.
    Announcing,
    /// Running a handler. Stop requests are not looked at until it returns.
    Busy,
    /// Exited for good.
    Stopped,
}

pub struct Worker {
    id: usize,
    pool: mpsc::Sender<JobSlot>,
    stop: CancellationToken,
    state: watch::Sender<WorkerState>,
}

/// Control handle for a spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: usize,
    stop: CancellationToken,
    state: watch::Receiver<WorkerState>,
}

impl Worker {
    /// Spawn a worker that offers itself to `pool` until stopped.
    pub fn spawn(id: usize, pool: mpsc::Sender<JobSlot>) -> WorkerHandle {
        let stop = CancellationToken::new();
        let (state, state_rx) = watch::channel(WorkerState::Announcing);

        let worker = Worker {
            id,
            pool,
            stop: stop.clone(),
            state,
        };
        tokio::spawn(worker.run());

        WorkerHandle {
            id,
            stop,
            state: state_rx,
        }
    }

    async fn run(self) {
        debug!("Worker {} started", self.id);

        while let Some(job) = self.announce().await {
            self.state.send_replace(WorkerState::Busy);
            self.handle(job).await;
        }

        self.state.send_replace(WorkerState::Stopped);
        debug!("Worker {} stopped", self.id);
    }

    /// Publish a fresh inbox and wait for a job. `None` means stop.
    async fn announce(&self) -> Option<Job> {
        loop {
            self.state.send_replace(WorkerState::Announcing);
            if self.stop.is_cancelled() {
                return None;
            }

            let (slot, mut inbox) = oneshot::channel();
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return None,
                sent = self.pool.send(slot) => {
                    // Pool receiver gone: the dispatcher has shut down.
                    sent.ok()?;
                }
            }

            let delivered = tokio::select! {
                biased;
                job = &mut inbox => job.ok(),
                _ = self.stop.cancelled() => {
                    // A hand-off may have landed just before the stop. Closing
                    // the inbox bounces any later one back to the dispatcher.
                    inbox.close();
                    inbox.try_recv().ok()
                }
            };

            // An inbox dropped without a job means the hand-off gave up; offer
            // ourselves again (or notice the pool is gone on the next send).
            if let Some(job) = delivered {
                return Some(job);
            }
        }
    }

    async fn handle(&self, job: Job) {
        let update_id = job.update.update_id;
        debug!("Worker {} handling update {}", self.id, update_id);

        let outcome = AssertUnwindSafe(job.bot.handle_update(job.update))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Some(Err(e))) => {
                error!(
                    "Worker {}: handler failed on update {}: {:#}",
                    self.id, update_id, e
                );
            }
            Err(panic) => {
                error!(
                    "Worker {}: handler panicked on update {}: {}",
                    self.id,
                    update_id,
                    panic_message(&*panic)
                );
            }
            Ok(_) => {}
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Ask the worker to exit. Takes effect the next time it is idle; a job
    /// in progress always runs to completion first.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the worker reaches `state`. Returns immediately if it is
    /// already there.
    pub async fn wait_for(&mut self, state: WorkerState) {
        // Stopped is published before the sender is dropped, so an error here
        // only means the state can never be reached.
        let _ = self.state.wait_for(|s| *s == state).await;
    }

    pub async fn stopped(&mut self) {
        self.wait_for(WorkerState::Stopped).await;
    }
}
