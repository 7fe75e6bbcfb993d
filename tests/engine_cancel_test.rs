//! Cancellation and shutdown integration tests.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use tokio::sync::Semaphore;

use common::{upload, wait_for_state, Behavior, ScriptedTranscoder, TestEngine};
use encoded_core::{Error, JobId};
use encoded_engine::JobState;

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_a_queued_job_takes_effect_immediately() {
    let gate = Arc::new(Semaphore::new(0));
    let t = TestEngine::start(1, ScriptedTranscoder::succeeding().with_gate(gate.clone()));

    let busy = t.submit("a.mkv", b"a").await;
    wait_for_state(&t.engine, busy, JobState::Running).await;
    let queued = t.submit("b.mkv", b"b").await;

    assert_eq!(t.engine.cancel(queued).unwrap(), JobState::Cancelled);
    let record = t.engine.status(queued).unwrap();
    assert_eq!(record.state, JobState::Cancelled);
    assert!(record.finished_at.is_some());
    assert_eq!(t.engine.queue_depth(), 0);

    gate.add_permits(1);
    wait_for_state(&t.engine, busy, JobState::Succeeded).await;

    // The cancelled job is never picked up.
    assert_eq!(t.transcoder.started(), vec![busy]);
    assert_eq!(t.engine.status(queued).unwrap().state, JobState::Cancelled);
}

#[tokio::test]
async fn cancelling_a_running_job_stops_the_transcode() {
    let t = TestEngine::start(1, ScriptedTranscoder::new(Behavior::Hang));

    let id = t.submit("a.mkv", b"a").await;
    wait_for_state(&t.engine, id, JobState::Running).await;

    assert_eq!(t.engine.cancel(id).unwrap(), JobState::Running);
    let record = wait_for_state(&t.engine, id, JobState::Cancelled).await;
    assert!(record.error.is_none());

    assert_matches!(t.engine.fetch(id).await, Err(Error::Conflict(_)));

    // The worker is free for the next job.
    let next = t.submit("b.mkv", b"b").await;
    wait_for_state(&t.engine, next, JobState::Running).await;
}

#[tokio::test]
async fn cancelling_a_finished_job_is_a_conflict() {
    let t = TestEngine::start(1, ScriptedTranscoder::succeeding());

    let id = t.submit("a.mkv", b"a").await;
    wait_for_state(&t.engine, id, JobState::Succeeded).await;

    assert_matches!(t.engine.cancel(id), Err(Error::Conflict(_)));
    assert_eq!(t.engine.status(id).unwrap().state, JobState::Succeeded);
}

#[tokio::test]
async fn cancelling_an_unknown_job_is_not_found() {
    let t = TestEngine::start(1, ScriptedTranscoder::succeeding());
    assert_matches!(t.engine.cancel(JobId::new()), Err(Error::NotFound { .. }));
}

#[tokio::test]
async fn cancelling_one_job_leaves_others_alone() {
    let t = TestEngine::start(2, ScriptedTranscoder::new(Behavior::Hang));

    let a = t.submit("a.mkv", b"a").await;
    let b = t.submit("b.mkv", b"b").await;
    wait_for_state(&t.engine, a, JobState::Running).await;
    wait_for_state(&t.engine, b, JobState::Running).await;

    t.engine.cancel(a).unwrap();
    wait_for_state(&t.engine, a, JobState::Cancelled).await;
    assert_eq!(t.engine.status(b).unwrap().state, JobState::Running);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_cancels_running_jobs_and_refuses_new_ones() {
    let t = TestEngine::start(1, ScriptedTranscoder::new(Behavior::Hang));

    let running = t.submit("a.mkv", b"a").await;
    wait_for_state(&t.engine, running, JobState::Running).await;
    let queued = t.submit("b.mkv", b"b").await;

    t.engine.shutdown().await;

    assert!(t.engine.is_shutting_down());
    assert_eq!(t.engine.status(running).unwrap().state, JobState::Cancelled);
    assert_eq!(t.engine.status(queued).unwrap().state, JobState::Queued);
    assert_matches!(
        t.engine.submit(upload("c.mkv", b"c")).await,
        Err(Error::Conflict(_))
    );

    // A second shutdown is a no-op.
    t.engine.shutdown().await;
}
