//! Fixed-size worker pool.
//!
//! Each worker is a tokio task that pulls ids from the [`WorkQueue`], claims
//! the job (`queued -> running`), runs the transcoder and records the
//! terminal state. Anything that goes wrong inside a job, a panic included,
//! ends up on that job's record; the worker itself keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use encoded_av::{JobWorkspace, TranscodeError, TranscodeRequest, Transcoder};
use encoded_core::{JobError, JobId};

use crate::job::JobState;
use crate::queue::WorkQueue;
use crate::results::ResultManager;
use crate::store::JobStore;

/// Shared state every worker reads.
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub queue: Arc<WorkQueue>,
    pub results: Arc<ResultManager>,
    pub transcoder: Arc<dyn Transcoder>,
    pub scratch_root: PathBuf,
    pub job_timeout: Duration,
    pub shutdown: CancellationToken,
}

/// Handles of the running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers named `worker-1` .. `worker-<size>`.
    pub fn spawn(size: usize, ctx: Arc<WorkerContext>) -> Self {
        let handles = (1..=size)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                let name = format!("worker-{i}");
                tokio::spawn(run_worker(name, ctx))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {e}");
            }
        }
    }
}

async fn run_worker(name: String, ctx: Arc<WorkerContext>) {
    tracing::debug!(worker = %name, "Worker started");

    loop {
        // Shutdown wins over queued work so queued jobs stay queued.
        let next = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => None,
            id = ctx.queue.pop() => id,
        };
        let Some(job_id) = next else {
            break;
        };
        process_job(&name, &ctx, job_id).await;
    }

    tracing::debug!(worker = %name, "Worker stopped");
}

async fn process_job(worker: &str, ctx: &WorkerContext, job_id: JobId) {
    let Some(slot) = ctx.store.slot(job_id) else {
        tracing::debug!(job_id = %job_id, "Skipping purged job");
        return;
    };

    let claimed = slot.update(|record| {
        record.start(worker)?;
        Ok::<_, encoded_core::Error>(TranscodeRequest {
            job_id,
            input: record.input.clone(),
            subtitle: record.subtitle.clone(),
            output: JobWorkspace::open(&ctx.scratch_root, job_id)
                .output_path(record.options.container),
            options: record.options.clone(),
            timeout: ctx.job_timeout,
        })
    });
    let request = match claimed {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(job_id = %job_id, error = %e, "Skipping job that is no longer queued");
            return;
        }
    };

    tracing::info!(job_id = %job_id, worker = %worker, "Job started");
    let cancel = slot.cancel_token().clone();

    let outcome = AssertUnwindSafe(ctx.transcoder.transcode(&request, &cancel))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(TranscodeError::Failed(JobError::internal(format!(
                "transcoder panicked: {}",
                panic_message(panic.as_ref())
            ))))
        });

    let finished = slot.update(|record| {
        if cancel.is_cancelled() {
            return record.cancel().map(|_| JobState::Cancelled);
        }
        match outcome {
            Ok(report) => record.succeed(report.output).map(|_| JobState::Succeeded),
            Err(TranscodeError::Failed(error)) => {
                tracing::warn!(job_id = %job_id, error = %error, "Job failed");
                record.fail(error).map(|_| JobState::Failed)
            }
            Err(TranscodeError::Cancelled) => record.cancel().map(|_| JobState::Cancelled),
        }
    });

    match finished {
        Ok(state) => tracing::info!(job_id = %job_id, worker = %worker, state = %state, "Job finished"),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Could not record job outcome"),
    }

    ctx.results.on_terminal(job_id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
