//! The engine handle.
//!
//! [`Engine`] owns the store, queue, worker pool and result manager and is
//! the only thing the transport layer talks to. It is cheap to share behind
//! an `Arc`; every method takes `&self`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use encoded_av::Transcoder;
use encoded_core::config::Config;
use encoded_core::{Error, JobId, Result};

use crate::admission::{Admission, SubmitRequest};
use crate::job::{JobRecord, JobState};
use crate::queue::WorkQueue;
use crate::results::{FetchedOutput, PurgeOutcome, ResultManager};
use crate::store::JobStore;
use crate::worker::{WorkerContext, WorkerPool};

/// Running job engine.
pub struct Engine {
    store: Arc<JobStore>,
    queue: Arc<WorkQueue>,
    admission: Admission,
    results: Arc<ResultManager>,
    workers: usize,
    shutdown: CancellationToken,
    pool: Mutex<Option<WorkerPool>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Validate `config` and start the workers and the retention sweeper.
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config, transcoder: Arc<dyn Transcoder>) -> Result<Self> {
        config.check()?;

        let shutdown = CancellationToken::new();
        let scratch_root = config.engine.scratch_dir.clone();
        let store = Arc::new(JobStore::new(shutdown.clone()));
        let queue = Arc::new(WorkQueue::new(config.engine.queue_bound()));
        let results = Arc::new(ResultManager::new(
            Arc::clone(&store),
            scratch_root.clone(),
            config.retention.clone(),
        ));
        let admission = Admission::new(Arc::clone(&store), Arc::clone(&queue), scratch_root.clone());

        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&store),
            queue: Arc::clone(&queue),
            results: Arc::clone(&results),
            transcoder,
            scratch_root: scratch_root.clone(),
            job_timeout: config.engine.job_timeout(),
            shutdown: shutdown.clone(),
        });
        let pool = WorkerPool::spawn(config.engine.workers, ctx);
        let sweeper = results.spawn_sweeper(config.retention.sweep_interval(), shutdown.clone());

        tracing::info!(
            workers = config.engine.workers,
            queue_capacity = ?config.engine.queue_bound(),
            retention = ?config.retention.policy,
            scratch = %scratch_root.display(),
            "Engine started"
        );

        Ok(Self {
            store,
            queue,
            admission,
            results,
            workers: config.engine.workers,
            shutdown,
            pool: Mutex::new(Some(pool)),
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Admit a new job. Returns as soon as it is queued.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        self.admission.submit(req).await
    }

    /// Snapshot of one job.
    pub fn status(&self, id: JobId) -> Result<JobRecord> {
        self.store.get(id).ok_or_else(|| Error::not_found("job", id))
    }

    /// Snapshots of every job still held, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    /// Lease the output of a succeeded job.
    pub async fn fetch(&self, id: JobId) -> Result<FetchedOutput> {
        self.results.fetch(id).await
    }

    /// Cancel a queued or running job.
    ///
    /// A queued job is cancelled immediately. A running job has its
    /// transcode signalled and ends `cancelled` once the worker observes it;
    /// the state returned is the one the job had when the request landed.
    pub fn cancel(&self, id: JobId) -> Result<JobState> {
        let slot = self.store.slot(id).ok_or_else(|| Error::not_found("job", id))?;

        let prior = slot.update(|record| match record.state {
            JobState::Queued => record.cancel().map(|_| JobState::Queued),
            JobState::Running => Ok(JobState::Running),
            state => Err(Error::Conflict(format!("job {id} is already {state}"))),
        })?;

        match prior {
            JobState::Queued => {
                self.queue.remove(id);
                self.results.on_terminal(id);
                tracing::info!(job_id = %id, "Cancelled queued job");
                Ok(JobState::Cancelled)
            }
            _ => {
                slot.cancel_token().cancel();
                tracing::info!(job_id = %id, "Cancellation requested for running job");
                Ok(JobState::Running)
            }
        }
    }

    /// Delete a finished job's artifacts now.
    pub fn purge(&self, id: JobId) -> Result<PurgeOutcome> {
        self.results.purge(id)
    }

    pub fn results(&self) -> &Arc<ResultManager> {
        &self.results
    }

    pub fn running_count(&self) -> usize {
        self.store.count_in(JobState::Running)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting work, cancel running transcodes and wait for every
    /// task to finish. Queued jobs stay queued. Idempotent.
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.queue.close();
        self.shutdown.cancel();

        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.join().await;
        }
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!("Sweeper task failed: {e}");
            }
        }
        tracing::info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.queue.close();
        self.shutdown.cancel();
    }
}
