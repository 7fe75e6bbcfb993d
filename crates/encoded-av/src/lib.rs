//! # encoded-av
//!
//! External tool management and process execution for the encode engine.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to
//!   ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout and
//!   cancellation support that reports a typed [`ToolError`].
//! - **Job workspaces** ([`JobWorkspace`]) -- per-job scratch directories
//!   named by job id.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) -- the seam the
//!   worker pool calls through, and its ffmpeg implementation.

pub mod command;
pub mod tools;
pub mod transcode;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolError, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{
    build_ffmpeg_args, classify_tool_error, FfmpegTranscoder, TranscodeError, TranscodeReport,
    TranscodeRequest, Transcoder,
};
pub use workspace::JobWorkspace;
