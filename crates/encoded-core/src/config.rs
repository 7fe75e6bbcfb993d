//! Application configuration types.
//!
//! The top-level [`Config`] struct carries all sub-configs for the server,
//! the job engine, result retention and external tools. Every section
//! defaults sensibly so a completely empty file is valid. Loading from disk
//! lives in the binary; this module only defines the shape and validation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub retention: RetentionConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Reject configurations the engine cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Validation("server.port cannot be 0".into()));
        }
        if self.server.max_upload_mb == 0 {
            return Err(Error::Validation("server.max_upload_mb must be at least 1".into()));
        }
        if self.engine.workers == 0 {
            return Err(Error::Validation("engine.workers must be at least 1".into()));
        }
        if !self.engine.unbounded_queue && self.engine.queue_capacity == 0 {
            return Err(Error::Validation(
                "engine.queue_capacity must be at least 1 (or set engine.unbounded_queue)".into(),
            ));
        }
        if self.engine.job_timeout_secs == 0 {
            return Err(Error::Validation(
                "engine.job_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(Error::Validation(
                "retention.sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.unbounded_queue {
            warnings.push(
                "engine.unbounded_queue is set; queued jobs (and their uploads) grow without limit under overload"
                    .into(),
            );
        }

        if self.retention.window_secs == 0 {
            warnings.push(
                "retention.window_secs is 0; finished jobs are purged on the next sweep".into(),
            );
        }

        if let Some(ref path) = self.tools.ffmpeg_path {
            if !path.exists() {
                warnings.push(format!(
                    "tools.ffmpeg_path {} does not exist; falling back to PATH",
                    path.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload request, in MiB. Uploads are buffered in
    /// memory before they reach the scratch directory.
    pub max_upload_mb: usize,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_upload_mb: 1024,
        }
    }
}

/// Worker pool, queue and scratch storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers (the only concurrency knob).
    pub workers: usize,
    /// Maximum number of queued (not yet running) jobs.
    pub queue_capacity: usize,
    /// Accept jobs without a queue bound. Memory grows with the backlog.
    pub unbounded_queue: bool,
    /// Maximum wall-clock time a single transcode may take.
    pub job_timeout_secs: u64,
    /// Root directory for per-job scratch directories.
    pub scratch_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 64,
            unbounded_queue: false,
            job_timeout_secs: 86400,
            scratch_dir: PathBuf::from("./temp"),
        }
    }
}

impl EngineConfig {
    /// Queue bound, or `None` for an unbounded queue.
    pub fn queue_bound(&self) -> Option<usize> {
        if self.unbounded_queue {
            None
        } else {
            Some(self.queue_capacity)
        }
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// When the output and record of a finished job are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Purge as soon as the first successful fetch completes.
    #[default]
    OnFetch,
    /// Keep results fetchable until the retention window elapses.
    Window,
}

/// Result retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    /// How long a terminal job stays in the store. Under `on_fetch` this is
    /// the upper bound for results nobody fetched.
    pub window_secs: u64,
    /// How often the sweeper looks for expired jobs.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::OnFetch,
            window_secs: 3600,
            sweep_interval_secs: 30,
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}
