//! Result delivery and cleanup.
//!
//! The [`ResultManager`] answers fetches, deletes inputs as soon as a job
//! reaches a terminal state, and purges outputs and records according to the
//! retention policy. A fetch holds a [`FetchLease`] for as long as the output
//! is being read; purges that arrive meanwhile are deferred to the release of
//! the last lease, so cleanup never pulls a file out from under a reader.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use encoded_av::JobWorkspace;
use encoded_core::config::{RetentionConfig, RetentionPolicy};
use encoded_core::{Error, JobError, JobId, Result};

use crate::job::JobState;
use crate::store::{JobSlot, JobStore, PurgeDecision};

/// What a purge request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Output, scratch directory and record were deleted by this call.
    Purged,
    /// A fetch is in flight; deletion happens when it finishes.
    Deferred,
    /// The job is unknown or already purged.
    Absent,
}

/// A succeeded job's output, ready to be streamed.
#[derive(Debug)]
pub struct FetchedOutput {
    pub job_id: JobId,
    pub path: PathBuf,
    /// Download name, `<job id>.<ext>`.
    pub file_name: String,
    pub size: u64,
    pub content_type: &'static str,
    /// Keep alive until the output has been read.
    pub lease: FetchLease,
}

/// Guard for an in-flight fetch. Dropping it ends the fetch.
///
/// Only a fetch ended through [`complete`](Self::complete) counts as a
/// delivery under the `on_fetch` policy; a lease dropped after a failed or
/// abandoned read leaves the job in place.
pub struct FetchLease {
    manager: Arc<ResultManager>,
    slot: Arc<JobSlot>,
    job_id: JobId,
    delivered: bool,
}

impl FetchLease {
    /// End the fetch after the whole output was handed to the caller.
    pub fn complete(mut self) {
        self.delivered = true;
    }
}

impl std::fmt::Debug for FetchLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchLease")
            .field("job_id", &self.job_id)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl Drop for FetchLease {
    fn drop(&mut self) {
        let purge_after =
            self.delivered && self.manager.retention.policy == RetentionPolicy::OnFetch;
        if self.slot.release_lease(purge_after) {
            tracing::debug!(job_id = %self.job_id, "Fetch finished, purging job");
            self.manager.delete_artifacts(self.job_id, &self.slot);
        }
    }
}

/// Serves outputs and owns cleanup of finished jobs.
#[derive(Debug)]
pub struct ResultManager {
    store: Arc<JobStore>,
    scratch_root: PathBuf,
    retention: RetentionConfig,
}

impl ResultManager {
    pub fn new(store: Arc<JobStore>, scratch_root: PathBuf, retention: RetentionConfig) -> Self {
        Self {
            store,
            scratch_root,
            retention,
        }
    }

    /// Look up the output of `id` and lease it for reading.
    pub async fn fetch(self: &Arc<Self>, id: JobId) -> Result<FetchedOutput> {
        let slot = self.store.slot(id).ok_or_else(|| Error::not_found("job", id))?;
        let record = slot.snapshot();

        match record.state {
            JobState::Queued | JobState::Running => return Err(Error::not_ready(id, record.state)),
            JobState::Failed => {
                return Err(Error::JobFailed {
                    id: id.to_string(),
                    error: record
                        .error
                        .unwrap_or_else(|| JobError::internal("failure was not recorded")),
                })
            }
            JobState::Cancelled => {
                return Err(Error::Conflict(format!("job {id} was cancelled")))
            }
            JobState::Succeeded => {}
        }

        if !slot.try_lease() {
            return Err(Error::not_found("job", id));
        }
        let lease = FetchLease {
            manager: Arc::clone(self),
            slot,
            job_id: id,
            delivered: false,
        };

        let path = record
            .output_path
            .ok_or_else(|| Error::Internal(format!("job {id} succeeded without an output")))?;
        let size = tokio::fs::metadata(&path).await?.len();
        let container = record.options.container;

        tracing::debug!(job_id = %id, size, "Serving output");
        Ok(FetchedOutput {
            job_id: id,
            file_name: format!("{id}.{}", container.extension()),
            path,
            size,
            content_type: container.mime_type(),
            lease,
        })
    }

    /// Fetch and read the whole output into memory.
    pub async fn fetch_bytes(self: &Arc<Self>, id: JobId) -> Result<Vec<u8>> {
        let output = self.fetch(id).await?;
        let data = tokio::fs::read(&output.path).await?;
        output.lease.complete();
        Ok(data)
    }

    /// Called once a job reaches a terminal state: its inputs are no longer
    /// needed.
    pub fn on_terminal(&self, id: JobId) {
        match JobWorkspace::open(&self.scratch_root, id).remove_inputs() {
            Ok(n) => tracing::debug!(job_id = %id, removed = n, "Removed job inputs"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to remove job inputs"),
        }
    }

    /// Delete a finished job's output, scratch directory and record. Safe to
    /// call any number of times; artifacts are deleted once.
    pub fn purge(&self, id: JobId) -> Result<PurgeOutcome> {
        let Some(slot) = self.store.slot(id) else {
            return Ok(PurgeOutcome::Absent);
        };
        let state = slot.state();
        if !state.is_terminal() {
            return Err(Error::Conflict(format!(
                "job {id} is {state}; only finished jobs can be purged"
            )));
        }

        match slot.begin_purge() {
            PurgeDecision::Proceed => {
                self.delete_artifacts(id, &slot);
                Ok(PurgeOutcome::Purged)
            }
            PurgeDecision::Deferred => {
                tracing::debug!(job_id = %id, "Purge deferred until fetch completes");
                Ok(PurgeOutcome::Deferred)
            }
            PurgeDecision::AlreadyPurged => Ok(PurgeOutcome::Absent),
        }
    }

    /// Purge every terminal job older than the retention window. Returns the
    /// number of jobs purged now.
    pub fn sweep(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention.window())
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            // Window reaches past the earliest representable time.
            tracing::debug!(window_secs = self.retention.window_secs, "Nothing old enough to sweep");
            return 0;
        };

        let purged = self
            .store
            .finished_before(cutoff)
            .into_iter()
            .filter(|id| matches!(self.purge(*id), Ok(PurgeOutcome::Purged)))
            .count();
        if purged > 0 {
            tracing::info!(purged, "Retention sweep purged expired jobs");
        }
        purged
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep();
                    }
                }
            }
            tracing::debug!("Retention sweeper stopped");
        })
    }

    fn delete_artifacts(&self, id: JobId, slot: &Arc<JobSlot>) {
        // Only remove the entry if it still belongs to this slot.
        if let Some(current) = self.store.slot(id) {
            if Arc::ptr_eq(&current, slot) {
                self.store.remove(id);
            }
        }
        let workspace = JobWorkspace::open(&self.scratch_root, id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_workspace(id, &workspace));
            }
            Err(_) => remove_workspace(id, &workspace),
        }
    }
}

fn remove_workspace(id: JobId, workspace: &JobWorkspace) {
    match workspace.remove() {
        Ok(_) => tracing::info!(job_id = %id, "Job purged"),
        Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to remove scratch directory"),
    }
}
