//! Unified error type for the encoded application.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].
//! Failures that happen *inside* a job (the transcoder crashed, timed out, or
//! was never installed) are not errors of the caller; they are recorded on the
//! job as a [`JobError`] and only surface through status and fetch queries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes in encoded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found (or was already purged).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The job exists but has not reached a terminal state yet.
    #[error("job {id} is not ready (state: {state})")]
    NotReady {
        /// The job identifier.
        id: String,
        /// The job's current state.
        state: String,
    },

    /// Request data failed validation. Nothing was created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The bounded work queue is full. Nothing was created.
    #[error("queue is full (capacity {capacity})")]
    Capacity {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The request conflicts with the current state of the resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The job reached the `failed` state; carries the recorded failure.
    #[error("job {id} failed: {error}")]
    JobFailed {
        /// The job identifier.
        id: String,
        /// The failure recorded on the job.
        error: JobError,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg) could not be used.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::NotReady { .. } => 409,
            Error::Validation(_) => 400,
            Error::Capacity { .. } => 503,
            Error::Conflict(_) => 409,
            Error::JobFailed { .. } => 422,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotReady`].
    pub fn not_ready(id: impl fmt::Display, state: impl fmt::Display) -> Self {
        Error::NotReady {
            id: id.to_string(),
            state: state.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Job-level failures
// ---------------------------------------------------------------------------

/// Classification of a terminal job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The transcoder ran and exited non-zero. Usually bad input.
    TranscodeFailure,
    /// The transcoder exceeded the configured execution timeout.
    Timeout,
    /// The transcoder could not be found or started.
    ToolUnavailable,
    /// Something unexpected went wrong inside the engine itself.
    Internal,
}

impl JobErrorKind {
    /// Whether the submitter can plausibly fix the failure by changing the
    /// input or options, as opposed to an operator fixing the environment.
    pub fn is_user_fixable(self) -> bool {
        matches!(self, JobErrorKind::TranscodeFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobErrorKind::TranscodeFailure => "transcode_failure",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::ToolUnavailable => "tool_unavailable",
            JobErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure recorded on a job when it transitions to `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    /// Summarized diagnostic; never the full tool output.
    pub message: String,
    /// Exit code of the transcoder, when it exited on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Internal, message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn not_ready_display() {
        let err = Error::not_ready("abc", "running");
        assert_eq!(err.to_string(), "job abc is not ready (state: running)");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn validation_display() {
        let err = Error::Validation("input_file is required".into());
        assert_eq!(err.to_string(), "Validation error: input_file is required");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn capacity_maps_to_503() {
        let err = Error::Capacity { capacity: 4 };
        assert_eq!(err.to_string(), "queue is full (capacity 4)");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "not found");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: not found");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn job_failed_carries_kind_and_exit_code() {
        let err = Error::JobFailed {
            id: "j1".into(),
            error: JobError::new(JobErrorKind::TranscodeFailure, "invalid data found")
                .with_exit_code(Some(1)),
        };
        assert_eq!(
            err.to_string(),
            "job j1 failed: [transcode_failure] invalid data found (exit code 1)"
        );
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn user_fixable_kinds() {
        assert!(JobErrorKind::TranscodeFailure.is_user_fixable());
        assert!(!JobErrorKind::ToolUnavailable.is_user_fixable());
        assert!(!JobErrorKind::Timeout.is_user_fixable());
        assert!(!JobErrorKind::Internal.is_user_fixable());
    }

    #[test]
    fn job_error_serializes_snake_case_kind() {
        let err = JobError::new(JobErrorKind::ToolUnavailable, "ffmpeg missing");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "tool_unavailable");
        assert!(json.get("exit_code").is_none());
    }
}
