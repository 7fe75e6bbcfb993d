//! Job record and its state machine.
//!
//! ```text
//! queued -> running -> succeeded
//!    |         |    -> failed
//!    +---------+----> cancelled
//! ```
//!
//! Every transition goes through a method on [`JobRecord`] that rejects moves
//! the diagram does not allow, so a terminal record can never be revived and
//! `output_path` and `error` are never both set.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use encoded_core::{EncodeOptions, Error, JobError, JobId, Result};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encode request and everything known about it.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    /// Uploaded media, inside the job's scratch directory.
    pub input: PathBuf,
    /// Uploaded subtitle, inside the job's scratch directory.
    pub subtitle: Option<PathBuf>,
    /// Set on `succeeded` only.
    pub output_path: Option<PathBuf>,
    /// Set on `failed` only.
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub options: EncodeOptions,
    /// Worker that claimed the job.
    pub worker: Option<String>,
}

impl JobRecord {
    /// A freshly admitted, queued job.
    pub fn new(
        id: JobId,
        input: PathBuf,
        subtitle: Option<PathBuf>,
        options: EncodeOptions,
    ) -> Self {
        Self {
            id,
            state: JobState::Queued,
            input,
            subtitle,
            output_path: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            options,
            worker: None,
        }
    }

    /// `queued -> running`, recording the claiming worker.
    pub fn start(&mut self, worker: &str) -> Result<()> {
        self.expect(&[JobState::Queued], JobState::Running)?;
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        self.worker = Some(worker.to_string());
        Ok(())
    }

    /// `running -> succeeded`.
    pub fn succeed(&mut self, output: PathBuf) -> Result<()> {
        self.expect(&[JobState::Running], JobState::Succeeded)?;
        self.state = JobState::Succeeded;
        self.output_path = Some(output);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `running -> failed`.
    pub fn fail(&mut self, error: JobError) -> Result<()> {
        self.expect(&[JobState::Running], JobState::Failed)?;
        self.state = JobState::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `queued | running -> cancelled`.
    pub fn cancel(&mut self) -> Result<()> {
        self.expect(&[JobState::Queued, JobState::Running], JobState::Cancelled)?;
        self.state = JobState::Cancelled;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn expect(&self, from: &[JobState], to: JobState) -> Result<()> {
        if from.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.state, to
            )))
        }
    }
}
