//! # encoded-engine
//!
//! The asynchronous job engine: accepts encode requests, runs them on a
//! fixed pool of workers and hands back results.
//!
//! - [`admission`] validates uploads, reserves queue capacity and creates jobs.
//! - [`queue`] is the FIFO of pending job ids.
//! - [`store`] holds every job record and its per-job synchronization.
//! - [`worker`] runs the pool that drives jobs through the state machine.
//! - [`results`] serves outputs and owns cleanup and retention.
//! - [`engine`] ties the pieces together behind one handle.

pub mod admission;
pub mod engine;
pub mod job;
pub mod queue;
pub mod results;
pub mod store;
pub mod worker;

pub use admission::{SubmitRequest, Upload};
pub use engine::Engine;
pub use job::{JobRecord, JobState};
pub use queue::WorkQueue;
pub use results::{FetchLease, FetchedOutput, PurgeOutcome, ResultManager};
pub use store::JobStore;
pub use worker::WorkerPool;
