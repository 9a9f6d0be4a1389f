//! Bounded concurrency queue
//!
//! Admission control for fuzz tasks inside one worker. A fair semaphore hands
//! out slots in the order callers started waiting; the permit travels with
//! the task and is returned when the task finishes, fails or panics.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::error::{FuzzError, Result};

/// Default number of in-flight tasks per worker
pub const DEFAULT_CONCURRENCY: usize = 500;

/// FIFO admission queue with a fixed number of slots
pub struct FuzzQueue {
    concurrency: usize,
    slots: Arc<Semaphore>,
    tasks: Mutex<JoinSet<Result<()>>>,
}

impl FuzzQueue {
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 || concurrency > Semaphore::MAX_PERMITS || concurrency > u32::MAX as usize
        {
            return Err(FuzzError::validation(format!(
                "Invalid concurrency: {}",
                concurrency
            ))
            .with_suggestion("Use a positive number of concurrent requests (-t)."));
        }

        Ok(Self {
            concurrency,
            slots: Arc::new(Semaphore::new(concurrency)),
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// Wait for a free slot, then start `task`
    ///
    /// Returns once the task has been started, not when it completes. A fatal
    /// error from an earlier task is returned here instead of starting the
    /// new one.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FuzzError::unknown("Fuzz queue closed", e))?;

        let mut tasks = self.tasks.lock();
        while let Some(finished) = tasks.try_join_next() {
            flatten(finished)?;
        }

        tasks.spawn(async move {
            let _slot = permit;
            task.await
        });
        Ok(())
    }

    /// Wait until every submitted task has finished
    pub async fn drain(&self) -> Result<()> {
        let all = self
            .slots
            .acquire_many(self.concurrency as u32)
            .await
            .map_err(|e| FuzzError::unknown("Fuzz queue closed", e))?;
        drop(all);

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut first_error = None;
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = flatten(finished) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn flatten(finished: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match finished {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(FuzzError::unknown("Fuzz task panicked", e)),
        // Cancelled tasks only happen while the runtime shuts down
        Err(_) => Ok(()),
    }
}
