use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ApiError, UpdateSource};
use crate::bot::Bot;
use crate::dispatch::{Job, JobQueue, QueueClosed};
use crate::types::Update;

/// Long-polling loop. Owns the offset cursor: the id of the next update to
/// ask for.
pub struct Poller<S> {
    source: S,
    timeout: u64,
    offset: i64,
    consecutive_failures: u64,
}

impl<S: UpdateSource> Poller<S> {
    /// `timeout` is the long-poll hold in seconds; 0 means short polling.
    pub fn new(source: S, timeout: u64) -> Self {
        Self {
            source,
            timeout,
            offset: 0,
            consecutive_failures: 0,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Fetch one batch. On success the offset moves past the highest id in
    /// the batch; on failure or an empty batch it stays put.
    pub async fn poll_once(&mut self) -> Result<Vec<Update>, ApiError> {
        let updates = self.source.fetch_updates(self.timeout, self.offset).await?;
        if let Some(max_id) = updates.iter().map(|u| u.update_id).max() {
            self.offset = self.offset.max(max_id + 1);
        }
        Ok(updates)
    }

    /// Fetch one batch and push every update onto `queue` in order. Fetch
    /// failures are logged and swallowed.
    pub async fn feed(&mut self, bot: &Arc<Bot>, queue: &JobQueue) -> Result<(), QueueClosed> {
        let updates = match self.poll_once().await {
            Ok(updates) => {
                self.consecutive_failures = 0;
                updates
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    "Failed to fetch updates (offset {}, {} in a row): {}",
                    self.offset, self.consecutive_failures, e
                );
                return Ok(());
            }
        };

        if !updates.is_empty() {
            debug!(
                "Fetched {} update(s), next offset {}",
                updates.len(),
                self.offset
            );
        }

        for update in updates {
            queue.push(Job::new(update, Arc::clone(bot))).await?;
        }
        Ok(())
    }

    /// Poll forever. Failed fetches are retried straight away with no delay
    /// or backoff. Returns only if the job queue is closed.
    pub async fn run(mut self, bot: Arc<Bot>, queue: JobQueue) -> QueueClosed {
        loop {
            if let Err(closed) = self.feed(&bot, &queue).await {
                return closed;
            }
        }
    }
}
