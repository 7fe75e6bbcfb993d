//! FIFO work queue of pending job ids.
//!
//! Admission first reserves a slot with [`WorkQueue::try_reserve`], creates
//! the job, then pushes through the [`Reservation`]. A reservation counts
//! against capacity, so a full queue is detected before anything is
//! allocated, and dropping an unused reservation gives the slot back.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use encoded_core::{Error, JobId, Result};

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<JobId>,
    reserved: usize,
    closed: bool,
}

/// Bounded or unbounded FIFO of job ids shared by admission and workers.
#[derive(Debug)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: Option<usize>,
}

impl WorkQueue {
    /// `None` means unbounded: the backlog grows with demand.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Reserve room for one job, failing fast when the queue is full.
    pub fn try_reserve(&self) -> Result<Reservation<'_>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Conflict("engine is shutting down".into()));
        }
        if let Some(capacity) = self.capacity {
            if inner.items.len() + inner.reserved >= capacity {
                return Err(Error::Capacity { capacity });
            }
        }
        inner.reserved += 1;
        Ok(Reservation {
            queue: self,
            armed: true,
        })
    }

    /// Wait for the next id. Returns `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<JobId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(id) = inner.items.pop_front() {
                    return Some(id);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Withdraw a queued id. Returns `false` if it was not queued.
    pub fn remove(&self, id: JobId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        inner.items.retain(|queued| *queued != id);
        inner.items.len() != before
    }

    /// Ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse new work and wake every waiting worker.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// A held queue slot. Push an id through it, or drop it to release the slot.
#[derive(Debug)]
pub struct Reservation<'a> {
    queue: &'a WorkQueue,
    armed: bool,
}

impl Reservation<'_> {
    /// Append `id` to the back of the queue.
    pub fn push(mut self, id: JobId) -> Result<()> {
        {
            let mut inner = self.queue.inner.lock();
            inner.reserved -= 1;
            self.armed = false;
            if inner.closed {
                return Err(Error::Conflict("engine is shutting down".into()));
            }
            inner.items.push_back(id);
        }
        self.queue.notify.notify_one();
        Ok(())
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.inner.lock().reserved -= 1;
        }
    }
}
