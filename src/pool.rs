//! Bounded worker pools for fan-out work.
//!
//! A [`WorkerPool`] runs at most `concurrency` tasks at once and holds at most
//! `queue_capacity` more waiting for a worker. Submissions beyond that are
//! rejected immediately rather than queued without bound.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PoolError;

/// Fixed-size task pool with a bounded wait queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    concurrency: usize,
    queue_capacity: usize,
    /// Admission: running plus queued tasks.
    slots: Arc<Semaphore>,
    /// Execution: running tasks.
    workers: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool named `name` for logging and errors.
    pub fn new(name: impl Into<String>, concurrency: usize, queue_capacity: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            name: name.into(),
            concurrency,
            queue_capacity,
            slots: Arc::new(Semaphore::new(concurrency + queue_capacity)),
            workers: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of tasks running at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of tasks currently running or queued.
    pub fn in_flight(&self) -> usize {
        self.concurrency + self.queue_capacity - self.slots.available_permits()
    }

    /// Spawn `task` once a worker is free.
    ///
    /// Fails with [`PoolError::Rejected`] when the pool and its queue are full.
    pub fn submit<F, T>(&self, task: F) -> Result<JoinHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            warn!(pool = %self.name, capacity = self.queue_capacity, "Worker pool queue full");
            PoolError::Rejected {
                pool: self.name.clone(),
                capacity: self.queue_capacity,
            }
        })?;

        let workers = Arc::clone(&self.workers);
        let name = self.name.clone();
        Ok(tokio::spawn(async move {
            let _slot = slot;
            let _worker = workers.acquire_owned().await.ok();
            debug!(pool = %name, "Worker started task");
            task.await
        }))
    }

    /// Wait for every handle, converting panics and aborts into [`PoolError::TaskFailed`].
    pub async fn join_all<T>(&self, handles: Vec<JoinHandle<T>>) -> Vec<Result<T, PoolError>> {
        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| {
                r.map_err(|e| PoolError::TaskFailed {
                    pool: self.name.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }
}
