//! Admission: turn an upload into a queued job, or refuse it with nothing
//! left behind.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use encoded_av::JobWorkspace;
use encoded_core::options::{file_extension, SUBTITLE_EXTENSIONS};
use encoded_core::{EncodeOptions, Error, JobId, Result};

use crate::job::JobRecord;
use crate::queue::WorkQueue;
use crate::store::JobStore;

/// Extension used when the input's file name does not carry a usable one.
const FALLBACK_INPUT_EXTENSION: &str = "bin";

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Bytes,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Everything a caller submits for one encode.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub input: Upload,
    pub subtitle: Option<Upload>,
    pub options: EncodeOptions,
}

impl SubmitRequest {
    pub fn new(input: Upload) -> Self {
        Self {
            input,
            subtitle: None,
            options: EncodeOptions::default(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: Upload) -> Self {
        self.subtitle = Some(subtitle);
        self
    }

    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Validated file extensions for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Accepted {
    input_ext: String,
    subtitle_ext: Option<String>,
}

/// Creates jobs: validation, capacity, scratch files, record, queue.
#[derive(Debug)]
pub struct Admission {
    store: Arc<JobStore>,
    queue: Arc<WorkQueue>,
    scratch_root: PathBuf,
}

impl Admission {
    pub fn new(store: Arc<JobStore>, queue: Arc<WorkQueue>, scratch_root: PathBuf) -> Self {
        Self {
            store,
            queue,
            scratch_root,
        }
    }

    /// Admit `req` and return its id once it is queued. Never waits for a
    /// worker.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        let accepted = validate(&req)?;
        let reservation = self.queue.try_reserve()?;

        let id = JobId::new();
        let workspace = JobWorkspace::create(&self.scratch_root, id).await?;

        let (input, subtitle) = match write_inputs(&workspace, &req, &accepted).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Failed to store upload");
                discard(&workspace, id);
                return Err(e.into());
            }
        };

        let input_bytes = req.input.data.len();
        self.store
            .insert(JobRecord::new(id, input, subtitle, req.options));

        if let Err(e) = reservation.push(id) {
            self.store.remove(id);
            discard(&workspace, id);
            return Err(e);
        }

        tracing::info!(
            job_id = %id,
            file = %req.input.file_name,
            bytes = input_bytes,
            subtitle = req.subtitle.is_some(),
            "Job queued"
        );
        Ok(id)
    }
}

fn validate(req: &SubmitRequest) -> Result<Accepted> {
    if req.input.file_name.trim().is_empty() {
        return Err(Error::Validation("input_file has no file name".into()));
    }
    if req.input.data.is_empty() {
        return Err(Error::Validation("input_file is empty".into()));
    }

    let subtitle_ext = match &req.subtitle {
        None => None,
        Some(sub) => {
            let ext = file_extension(&sub.file_name)
                .filter(|ext| SUBTITLE_EXTENSIONS.contains(&ext.as_str()))
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "subtitle '{}' must have one of the extensions: {}",
                        sub.file_name,
                        SUBTITLE_EXTENSIONS.join(", ")
                    ))
                })?;
            if sub.data.is_empty() {
                return Err(Error::Validation("subtitle file is empty".into()));
            }
            Some(ext)
        }
    };

    req.options.validate()?;

    let input_ext = file_extension(&req.input.file_name)
        .filter(|ext| is_safe_extension(ext))
        .unwrap_or_else(|| FALLBACK_INPUT_EXTENSION.to_string());

    Ok(Accepted {
        input_ext,
        subtitle_ext,
    })
}

/// Only short alphanumeric extensions make it into scratch file names.
fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn write_inputs(
    workspace: &JobWorkspace,
    req: &SubmitRequest,
    accepted: &Accepted,
) -> std::io::Result<(PathBuf, Option<PathBuf>)> {
    let input = workspace
        .write_file(&workspace.input_path(&accepted.input_ext), &req.input.data)
        .await?;

    let subtitle = match (&req.subtitle, &accepted.subtitle_ext) {
        (Some(sub), Some(ext)) => Some(
            workspace
                .write_file(&workspace.subtitle_path(ext), &sub.data)
                .await?,
        ),
        _ => None,
    };

    Ok((input, subtitle))
}

fn discard(workspace: &JobWorkspace, id: JobId) {
    if let Err(e) = workspace.remove() {
        tracing::warn!(job_id = %id, error = %e, "Failed to remove scratch directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio_util::sync::CancellationToken;

    use crate::job::JobState;

    struct Harness {
        _root: tempfile::TempDir,
        scratch: PathBuf,
        store: Arc<JobStore>,
        queue: Arc<WorkQueue>,
        admission: Admission,
    }

    fn harness(capacity: Option<usize>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        let store = Arc::new(JobStore::new(CancellationToken::new()));
        let queue = Arc::new(WorkQueue::new(capacity));
        let admission = Admission::new(Arc::clone(&store), Arc::clone(&queue), scratch.clone());
        Harness {
            _root: root,
            scratch,
            store,
            queue,
            admission,
        }
    }

    fn video() -> Upload {
        Upload::new("holiday.MKV", &b"not really a video"[..])
    }

    fn scratch_entries(h: &Harness) -> usize {
        std::fs::read_dir(&h.scratch).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn submit_creates_queued_job_with_files() {
        let h = harness(Some(4));
        let req = SubmitRequest::new(video()).with_subtitle(Upload::new("subs.srt", "1\n"));
        let id = h.admission.submit(req).await.unwrap();

        let record = h.store.get(id).unwrap();
        assert_eq!(record.state, JobState::Queued);
        assert!(record.input.ends_with("input.mkv"));
        assert!(record.input.starts_with(h.scratch.join(id.to_string())));
        assert_eq!(std::fs::read(&record.input).unwrap(), b"not really a video");
        assert!(record.subtitle.unwrap().ends_with("subtitle.srt"));
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_side_effects() {
        let h = harness(Some(4));
        let err = h
            .admission
            .submit(SubmitRequest::new(Upload::new("a.mp4", Bytes::new())))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
        assert!(h.store.is_empty());
        assert_eq!(scratch_entries(&h), 0);
    }

    #[tokio::test]
    async fn bad_subtitle_extension_is_rejected() {
        let h = harness(None);
        let req = SubmitRequest::new(video()).with_subtitle(Upload::new("subs.txt", "x"));
        let err = h.admission.submit(req).await.unwrap_err();
        assert_matches!(err, Error::Validation(msg) if msg.contains("srt"));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let h = harness(None);
        let options = EncodeOptions {
            constant_rate_factor: 60,
            ..Default::default()
        };
        let err = h
            .admission
            .submit(SubmitRequest::new(video()).with_options(options))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
        assert_eq!(h.queue.len(), 0);
    }

    #[tokio::test]
    async fn full_queue_creates_nothing() {
        let h = harness(Some(1));
        h.admission.submit(SubmitRequest::new(video())).await.unwrap();

        let err = h
            .admission
            .submit(SubmitRequest::new(video()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Capacity { capacity: 1 });
        assert_eq!(h.store.len(), 1);
        assert_eq!(scratch_entries(&h), 1);
    }

    #[tokio::test]
    async fn odd_input_extension_falls_back() {
        let h = harness(None);
        let id = h
            .admission
            .submit(SubmitRequest::new(Upload::new("clip.m$v", "data")))
            .await
            .unwrap();
        assert!(h.store.get(id).unwrap().input.ends_with("input.bin"));
    }

    #[tokio::test]
    async fn unwritable_scratch_root_fails_cleanly() {
        let h = harness(Some(2));
        // A file where the scratch root should be makes directory creation fail.
        std::fs::write(&h.scratch, b"in the way").unwrap();
        let err = h
            .admission
            .submit(SubmitRequest::new(video()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Io { .. });
        assert!(h.store.is_empty());
        // The reservation was released.
        assert!(h.queue.try_reserve().is_ok());
    }
}
