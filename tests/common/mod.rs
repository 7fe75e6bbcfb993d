//! Shared test harness for integration tests.
//!
//! Provides [`TestEngine`], which starts a real [`Engine`] over a temporary
//! scratch directory with a [`ScriptedTranscoder`] standing in for ffmpeg,
//! plus helpers for polling job state and building multipart uploads.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use encoded::server::{build_router, AppContext};
use encoded_av::{ToolRegistry, TranscodeError, TranscodeReport, TranscodeRequest, Transcoder};
use encoded_core::config::{Config, RetentionPolicy};
use encoded_core::{JobError, JobId};
use encoded_engine::{Engine, JobRecord, JobState, SubmitRequest, Upload};

/// Prefix the scripted transcoder puts in front of the input bytes.
pub const ENCODED_PREFIX: &[u8] = b"encoded:";

/// What the scripted transcoder does with every job.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write `ENCODED_PREFIX + input` to the output.
    Succeed,
    /// Report this failure.
    Fail(JobError),
    /// Panic inside the transcode.
    Panic,
    /// Run until cancelled.
    Hang,
}

/// In-process [`Transcoder`] with observable concurrency.
pub struct ScriptedTranscoder {
    behavior: Behavior,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<JobId>>,
}

impl ScriptedTranscoder {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            gate: None,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behavior::Succeed)
    }

    /// Sleep this long inside every transcode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold every transcode until a permit is added to `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Job ids in the order workers started them.
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().unwrap().clone()
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(
        &self,
        req: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(req.job_id);

        let wait = async {
            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            tokio::time::sleep(self.delay).await;
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            _ = wait => {}
        }

        match &self.behavior {
            Behavior::Succeed => {
                let input = tokio::fs::read(&req.input)
                    .await
                    .map_err(|e| TranscodeError::Failed(JobError::internal(e.to_string())))?;
                let mut output = ENCODED_PREFIX.to_vec();
                output.extend_from_slice(&input);
                tokio::fs::write(&req.output, output)
                    .await
                    .map_err(|e| TranscodeError::Failed(JobError::internal(e.to_string())))?;
                Ok(TranscodeReport {
                    output: req.output.clone(),
                    duration: self.delay,
                })
            }
            Behavior::Fail(error) => Err(TranscodeError::Failed(error.clone())),
            Behavior::Panic => panic!("scripted transcoder panic"),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(TranscodeError::Cancelled)
            }
        }
    }
}

/// Config pointing at `scratch` with `workers` workers.
pub fn test_config(scratch: &Path, workers: usize) -> Config {
    let mut config = Config::default();
    config.engine.workers = workers;
    config.engine.scratch_dir = scratch.to_path_buf();
    config.engine.job_timeout_secs = 30;
    config.retention.policy = RetentionPolicy::OnFetch;
    config
}

/// A started engine plus everything it was built from.
pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub transcoder: Arc<ScriptedTranscoder>,
    pub config: Config,
    pub scratch: TempDir,
}

impl TestEngine {
    /// Start an engine with `workers` workers and default settings.
    pub fn start(workers: usize, transcoder: ScriptedTranscoder) -> Self {
        Self::start_with(transcoder, |_| {}, workers)
    }

    /// Start an engine after letting `tweak` adjust the config.
    pub fn start_with(
        transcoder: ScriptedTranscoder,
        tweak: impl FnOnce(&mut Config),
        workers: usize,
    ) -> Self {
        let scratch = TempDir::new().expect("failed to create scratch dir");
        let mut config = test_config(scratch.path(), workers);
        tweak(&mut config);

        let transcoder = Arc::new(transcoder);
        let engine = Engine::start(&config, Arc::clone(&transcoder) as Arc<dyn Transcoder>)
            .expect("failed to start engine");

        Self {
            engine: Arc::new(engine),
            transcoder,
            config,
            scratch,
        }
    }

    /// Submit an upload with default options.
    pub async fn submit(&self, name: &str, data: &[u8]) -> JobId {
        self.engine
            .submit(upload(name, data))
            .await
            .expect("submit failed")
    }

    pub fn job_dir(&self, id: JobId) -> std::path::PathBuf {
        self.scratch.path().join(id.to_string())
    }

    /// Router over this engine, as the server would build it.
    pub fn router(&self) -> axum::Router {
        let ctx = AppContext::new(
            Arc::clone(&self.engine),
            self.config.clone(),
            Arc::new(ToolRegistry::default()),
        );
        build_router(ctx)
    }
}

/// Request for `name` with the given bytes and default options.
pub fn upload(name: &str, data: &[u8]) -> SubmitRequest {
    SubmitRequest::new(Upload::new(name.to_string(), data.to_vec()))
}

/// Poll until `pred` holds for job `id`, panicking after 10 seconds.
pub async fn wait_for(engine: &Engine, id: JobId, pred: impl Fn(&JobRecord) -> bool) -> JobRecord {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(record) = engine.status(id) {
            if pred(&record) {
                return record;
            }
        }
        if Instant::now() > deadline {
            panic!(
                "timed out waiting for job {id}; last status: {:?}",
                engine.status(id).map(|r| r.state)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(engine: &Engine, id: JobId, state: JobState) -> JobRecord {
    wait_for(engine, id, |r| r.state == state).await
}

/// Poll until `cond` holds, panicking after 10 seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a purged job's scratch directory to disappear.
pub async fn wait_removed(path: &Path) {
    eventually(&format!("removal of {}", path.display()), || !path.exists()).await;
}

/// One part of a multipart form.
pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

pub const BOUNDARY: &str = "encoded-test-boundary";

/// Encode `parts` as a `multipart/form-data` body.
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                    .as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
