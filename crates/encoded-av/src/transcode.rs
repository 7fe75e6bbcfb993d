//! The transcoding seam.
//!
//! Workers call through the [`Transcoder`] trait so the engine can be driven
//! by a fake in tests. [`FfmpegTranscoder`] is the production implementation:
//! it builds an x264/AAC command line from the job's [`EncodeOptions`], runs
//! it through [`ToolCommand`] and classifies whatever goes wrong into a
//! [`JobError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use encoded_core::{EncodeOptions, JobError, JobErrorKind, JobId};
use tokio_util::sync::CancellationToken;

use crate::command::{ToolCommand, ToolError};
use crate::tools::ToolRegistry;

/// Largest frame width we encode; wider sources are scaled down.
const MAX_WIDTH: u32 = 3840;

/// Diagnostics longer than this are cut.
const MAX_MESSAGE_CHARS: usize = 240;

/// Everything a transcoder needs to run one job.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub job_id: JobId,
    pub input: PathBuf,
    pub subtitle: Option<PathBuf>,
    pub output: PathBuf,
    pub options: EncodeOptions,
    /// Wall-clock limit for the run.
    pub timeout: Duration,
}

/// Outcome of a successful transcode.
#[derive(Debug, Clone)]
pub struct TranscodeReport {
    pub output: PathBuf,
    pub duration: Duration,
}

/// Why a transcode produced no output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeError {
    /// The run failed; the error is recorded on the job.
    #[error("{0}")]
    Failed(JobError),
    /// The job's cancellation token fired before the run finished.
    #[error("cancelled")]
    Cancelled,
}

impl From<JobError> for TranscodeError {
    fn from(err: JobError) -> Self {
        TranscodeError::Failed(err)
    }
}

/// Converts one input (plus optional subtitle) into one output file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run the transcode described by `req`. Must return promptly with
    /// [`TranscodeError::Cancelled`] once `cancel` fires.
    async fn transcode(
        &self,
        req: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError>;
}

/// [`Transcoder`] backed by the ffmpeg binary found in the [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    tools: Arc<ToolRegistry>,
}

impl FfmpegTranscoder {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        req: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError> {
        let ffmpeg = self
            .tools
            .require("ffmpeg")
            .map_err(|e| JobError::new(JobErrorKind::ToolUnavailable, e.to_string()))?;

        let args = build_ffmpeg_args(req);
        tracing::info!(
            job_id = %req.job_id,
            preset = %req.options.ffmpeg_preset,
            crf = req.options.constant_rate_factor,
            container = %req.options.container,
            "Starting ffmpeg"
        );
        tracing::debug!(job_id = %req.job_id, ?args, "ffmpeg arguments");

        let mut cmd = ToolCommand::new(ffmpeg.path.clone());
        cmd.args(args).timeout(req.timeout);

        let output = cmd
            .execute_cancellable(cancel)
            .await
            .map_err(classify_tool_error)?;

        match tokio::fs::metadata(&req.output).await {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                return Err(JobError::new(
                    JobErrorKind::TranscodeFailure,
                    "ffmpeg exited successfully but wrote an empty output",
                )
                .into())
            }
            Err(e) => {
                return Err(JobError::new(
                    JobErrorKind::TranscodeFailure,
                    format!("ffmpeg exited successfully but output is missing: {e}"),
                )
                .into())
            }
        }

        Ok(TranscodeReport {
            output: req.output.clone(),
            duration: output.duration,
        })
    }
}

/// Build the ffmpeg argument list for `req`.
///
/// Video is scaled down to at most 3840 pixels wide (height follows, kept
/// even) and encoded as H.264 high@4.2 yuv420p with the requested preset and
/// CRF. Audio is AAC at the requested bitrate, stereo or mono. A subtitle is
/// burned into the picture, or carried as a soft track when
/// `burn_subtitles` is off.
pub fn build_ffmpeg_args(req: &TranscodeRequest) -> Vec<String> {
    let opts = &req.options;
    let container = opts.container;
    let soft_subtitle = req.subtitle.as_deref().filter(|_| !opts.burn_subtitles);

    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(path_arg(&req.input));

    if let Some(sub) = soft_subtitle {
        args.push("-i".into());
        args.push(path_arg(sub));
        args.extend(
            ["-map", "0:v:0", "-map", "0:a?", "-map", "1:0"]
                .into_iter()
                .map(String::from),
        );
    }

    let mut filter = format!("scale='min({MAX_WIDTH},iw)':-2");
    if let Some(sub) = req.subtitle.as_deref().filter(|_| opts.burn_subtitles) {
        filter.push_str(&format!(",subtitles='{}'", escape_filter_path(sub)));
    }
    args.push("-vf".into());
    args.push(filter);

    args.extend(
        [
            "-c:v", "libx264", "-preset", opts.ffmpeg_preset.as_str(), "-profile:v", "high", "-level",
            "4.2", "-pix_fmt", "yuv420p", "-crf",
        ]
        .into_iter()
        .map(String::from),
    );
    args.push(opts.constant_rate_factor.to_string());

    if container.supports_faststart() {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }

    args.push("-c:a".into());
    args.push("aac".into());
    args.push("-b:a".into());
    args.push(format!("{}k", opts.audio_bitrate));
    args.push("-ac".into());
    args.push(opts.audio_channels().to_string());

    if soft_subtitle.is_some() {
        let codec = if container.supports_faststart() {
            "mov_text"
        } else {
            "srt"
        };
        args.push("-c:s".into());
        args.push(codec.into());
    }

    args.push(path_arg(&req.output));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Escape a path for use inside a single-quoted filtergraph argument.
fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\:"),
            '\'' => out.push_str("'\\''"),
            _ => out.push(c),
        }
    }
    out
}

/// Map a tool execution failure onto the job failure taxonomy.
pub fn classify_tool_error(err: ToolError) -> TranscodeError {
    match err {
        ToolError::Spawn { tool, source } => JobError::new(
            JobErrorKind::ToolUnavailable,
            format!("could not start {tool}: {source}"),
        )
        .into(),
        ToolError::TimedOut { tool, timeout } => JobError::new(
            JobErrorKind::Timeout,
            format!("{tool} did not finish within {}s", timeout.as_secs()),
        )
        .into(),
        ToolError::Cancelled { .. } => TranscodeError::Cancelled,
        ToolError::Failed {
            tool,
            status,
            stderr,
            ..
        } => {
            let code = status.code();
            // 126/127 are the shell's "not executable" and "not found".
            let kind = match code {
                Some(126) | Some(127) => JobErrorKind::ToolUnavailable,
                _ => JobErrorKind::TranscodeFailure,
            };
            let message = summarize_stderr(&stderr)
                .unwrap_or_else(|| format!("{tool} exited with {status}"));
            JobError::new(kind, message).with_exit_code(code).into()
        }
        ToolError::Io { tool, source } => {
            JobError::internal(format!("waiting for {tool} failed: {source}")).into()
        }
    }
}

/// Last non-empty stderr line, truncated.
fn summarize_stderr(stderr: &str) -> Option<String> {
    let line = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= MAX_MESSAGE_CHARS {
        return Some(line.to_string());
    }
    let cut: String = line.chars().take(MAX_MESSAGE_CHARS).collect();
    Some(format!("{cut}..."))
}
