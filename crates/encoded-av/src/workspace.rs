//! Per-job scratch directories.
//!
//! Every job owns exactly one directory, `<scratch_root>/<job id>/`, holding
//! its uploaded input, optional subtitle and the transcoder output. Nothing
//! else writes there, so removing the directory is the whole cleanup story
//! for a job.

use std::io;
use std::path::{Path, PathBuf};

use encoded_core::{Container, JobId};

const INPUT_STEM: &str = "input";
const SUBTITLE_STEM: &str = "subtitle";
const OUTPUT_STEM: &str = "output";

/// Scratch directory owned by a single job.
///
/// # Example
///
/// ```no_run
/// use encoded_av::JobWorkspace;
/// use encoded_core::{Container, JobId};
///
/// # async fn example() -> std::io::Result<()> {
/// let ws = JobWorkspace::create(std::path::Path::new("./temp"), JobId::new()).await?;
/// let input = ws.write_file(&ws.input_path("mkv"), b"...").await?;
/// let output = ws.output_path(Container::Mp4);
/// // ... transcode input -> output ...
/// ws.remove()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    /// Create the directory for `id` under `root`. Fails if it already exists.
    pub async fn create(root: &Path, id: JobId) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = root.join(id.to_string());
        tokio::fs::create_dir(&dir).await?;
        tracing::debug!(job_id = %id, dir = %dir.display(), "Created job workspace");
        Ok(Self { dir })
    }

    /// Handle to an existing (or already removed) workspace.
    pub fn open(root: &Path, id: JobId) -> Self {
        Self {
            dir: root.join(id.to_string()),
        }
    }

    /// Path to the workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the uploaded input is stored.
    pub fn input_path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{INPUT_STEM}.{ext}"))
    }

    /// Where the uploaded subtitle is stored.
    pub fn subtitle_path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{SUBTITLE_STEM}.{ext}"))
    }

    /// Where the transcoder writes its output.
    pub fn output_path(&self, container: Container) -> PathBuf {
        self.dir.join(format!("{OUTPUT_STEM}.{}", container.extension()))
    }

    /// Write `data` to `path`, which must lie inside this workspace.
    pub async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<PathBuf> {
        if path.parent() != Some(self.dir.as_path()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is outside the job workspace", path.display()),
            ));
        }
        tokio::fs::write(path, data).await?;
        Ok(path.to_path_buf())
    }

    /// Delete uploaded inputs, keeping any output. Returns how many files
    /// were removed.
    pub fn remove_inputs(&self) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_input = [INPUT_STEM, SUBTITLE_STEM]
                .iter()
                .any(|stem| name.starts_with(&format!("{stem}.")));
            if !is_input {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Remove the whole directory. Returns `false` when it was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
