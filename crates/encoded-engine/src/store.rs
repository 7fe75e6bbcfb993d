//! In-memory job store.
//!
//! The store maps job ids to [`JobSlot`]s. Each slot owns its record behind
//! its own lock, its cancellation token and its fetch/purge bookkeeping, so
//! work on one job never blocks another. Callers get cloned snapshots; only
//! the engine's components mutate records, always through the slot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use encoded_core::JobId;

use crate::job::{JobRecord, JobState};

/// What a purge request should do, decided under the slot's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeDecision {
    /// Nobody is reading the output; the caller deletes it now.
    Proceed,
    /// A fetch is in flight; the last lease release will delete it.
    Deferred,
    /// Someone else already purged the job.
    AlreadyPurged,
}

#[derive(Debug, Default)]
struct Lifecycle {
    leases: usize,
    purge_pending: bool,
    purged: bool,
}

/// A job's record plus the synchronization around it.
#[derive(Debug)]
pub struct JobSlot {
    record: RwLock<JobRecord>,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl JobSlot {
    fn new(record: JobRecord, cancel: CancellationToken) -> Self {
        Self {
            record: RwLock::new(record),
            cancel,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Clone of the current record.
    pub fn snapshot(&self) -> JobRecord {
        self.record.read().clone()
    }

    pub fn state(&self) -> JobState {
        self.record.read().state
    }

    /// Run `f` with exclusive access to the record.
    pub fn update<R>(&self, f: impl FnOnce(&mut JobRecord) -> R) -> R {
        f(&mut *self.record.write())
    }

    /// Token that stops this job's transcode.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register a reader of the job's output. Fails once the job is purged.
    pub fn try_lease(&self) -> bool {
        let mut life = self.lifecycle.lock();
        if life.purged {
            return false;
        }
        life.leases += 1;
        true
    }

    /// Drop a reader. Returns `true` when the caller must now delete the
    /// job's artifacts: the last reader left and a purge was requested
    /// (`purge_after`, or a purge deferred while the lease was held).
    pub fn release_lease(&self, purge_after: bool) -> bool {
        let mut life = self.lifecycle.lock();
        life.leases = life.leases.saturating_sub(1);
        if life.leases == 0 && !life.purged && (purge_after || life.purge_pending) {
            life.purged = true;
            return true;
        }
        false
    }

    /// Claim the right to delete the job's artifacts.
    pub fn begin_purge(&self) -> PurgeDecision {
        let mut life = self.lifecycle.lock();
        if life.purged {
            PurgeDecision::AlreadyPurged
        } else if life.leases > 0 {
            life.purge_pending = true;
            PurgeDecision::Deferred
        } else {
            life.purged = true;
            PurgeDecision::Proceed
        }
    }

    pub fn lease_count(&self) -> usize {
        self.lifecycle.lock().leases
    }
}

/// Id-indexed map of every live job.
#[derive(Debug)]
pub struct JobStore {
    jobs: DashMap<JobId, Arc<JobSlot>>,
    shutdown: CancellationToken,
}

impl JobStore {
    /// Every job's cancellation token is a child of `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: DashMap::new(),
            shutdown,
        }
    }

    pub fn insert(&self, record: JobRecord) -> Arc<JobSlot> {
        let id = record.id;
        let slot = Arc::new(JobSlot::new(record, self.shutdown.child_token()));
        self.jobs.insert(id, Arc::clone(&slot));
        slot
    }

    pub fn slot(&self, id: JobId) -> Option<Arc<JobSlot>> {
        self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.slot(id).map(|slot| slot.snapshot())
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobSlot>> {
        self.jobs.remove(&id).map(|(_, slot)| slot)
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let slots: Vec<Arc<JobSlot>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        let mut records: Vec<JobRecord> = slots.iter().map(|s| s.snapshot()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Ids of terminal jobs that finished at or before `cutoff`.
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let slots: Vec<Arc<JobSlot>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        slots
            .iter()
            .filter_map(|slot| {
                let record = slot.record.read();
                let expired = record.state.is_terminal()
                    && record.finished_at.is_some_and(|t| t <= cutoff);
                expired.then_some(record.id)
            })
            .collect()
    }

    pub fn count_in(&self, state: JobState) -> usize {
        let slots: Vec<Arc<JobSlot>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        slots.iter().filter(|s| s.state() == state).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
