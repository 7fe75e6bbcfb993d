//! Encode job route handlers.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;

use encoded_core::{EncodeOptions, Error, JobId};
use encoded_engine::{JobRecord, JobState, SubmitRequest, Upload};

use super::context::AppContext;
use super::error::AppError;

/// Multipart form accepted by `POST /encode/start`.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct StartForm {
    /// Media file to encode.
    #[schema(value_type = String, format = Binary)]
    input_file: Vec<u8>,
    /// Optional subtitle (`.srt`, `.ass`, `.ssa` or `.vtt`).
    #[schema(value_type = Option<String>, format = Binary)]
    srt_file: Option<Vec<u8>>,
    /// JSON-encoded encode options; every field is optional.
    options: Option<String>,
}

/// Response to a successful submission.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StartResponse {
    pub ticket_id: String,
    pub status: String,
}

/// Failure recorded on a job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FailureResponse {
    /// `transcode_failure`, `timeout`, `tool_unavailable` or `internal`.
    pub kind: String,
    pub message: String,
    pub exit_code: Option<i32>,
}

/// Status snapshot of one job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobStatusResponse {
    pub ticket_id: String,
    pub status: String,
    pub worker: Option<String>,
    pub error: Option<FailureResponse>,
    pub container: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobStatusResponse {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            ticket_id: record.id.to_string(),
            status: record.state.to_string(),
            worker: record.worker.clone(),
            error: record.error.as_ref().map(|e| FailureResponse {
                kind: e.kind.to_string(),
                message: e.message.clone(),
                exit_code: e.exit_code,
            }),
            container: record.options.container.to_string(),
            created_at: record.created_at.to_rfc3339(),
            started_at: record.started_at.map(|t| t.to_rfc3339()),
            finished_at: record.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Response to a cancellation request.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub ticket_id: String,
    /// `cancelled`, or `cancelling` while a running transcode stops.
    pub status: String,
}

/// Liveness and load.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workers: usize,
    pub running: usize,
    pub queued: usize,
    pub queue_capacity: Option<usize>,
    pub ffmpeg_available: bool,
}

/// Unknown and malformed ids are both "not found".
fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse::<JobId>()
        .map_err(|_| AppError::from(Error::not_found("job", raw)))
}

/// POST /encode/start
#[utoipa::path(
    post,
    path = "/encode/start",
    request_body(content = StartForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job queued", body = StartResponse),
        (status = 400, description = "Invalid upload or options"),
        (status = 503, description = "Queue is full")
    )
)]
pub async fn start_encode(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut input = None;
    let mut subtitle = None;
    let mut options_raw = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "input_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                input = Some(Upload::new(file_name, data));
            }
            "srt_file" | "subtitle_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                // Browsers send an empty part for an untouched file input.
                if !(file_name.is_empty() && data.is_empty()) {
                    subtitle = Some(Upload::new(file_name, data));
                }
            }
            "options" => {
                options_raw = Some(field.text().await?);
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let input =
        input.ok_or_else(|| Error::Validation("input_file is required".into()))?;
    let options = EncodeOptions::from_json(options_raw.as_deref().unwrap_or_default())?;

    let request = SubmitRequest {
        input,
        subtitle,
        options,
    };
    let id = ctx.engine.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            ticket_id: id.to_string(),
            status: JobState::Queued.to_string(),
        }),
    ))
}

/// GET /encode/status/{id}
#[utoipa::path(
    get,
    path = "/encode/status/{id}",
    params(("id" = String, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Unknown or purged job")
    )
)]
pub async fn job_status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let id = parse_job_id(&id)?;
    let record = ctx.engine.status(id)?;
    Ok(Json(JobStatusResponse::from_record(&record)))
}

/// GET /encode/result/{id}
#[utoipa::path(
    get,
    path = "/encode/result/{id}",
    params(("id" = String, Path, description = "Ticket id")),
    responses(
        (status = 200, description = "Encoded file", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown or purged job"),
        (status = 409, description = "Job not finished, or cancelled"),
        (status = 422, description = "Job failed")
    )
)]
pub async fn job_result(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_job_id(&id)?;
    let output = ctx.engine.fetch(id).await?;

    let file = tokio::fs::File::open(&output.path)
        .await
        .map_err(Error::from)?;
    // The lease rides along with the body. Reaching end of file completes
    // the fetch; a read error or a client that goes away only releases it.
    let stream = futures::stream::unfold(
        (ReaderStream::new(file), output.lease),
        |(mut reader, lease)| async move {
            match reader.next().await {
                Some(chunk) => Some((chunk, (reader, lease))),
                None => {
                    lease.complete();
                    None
                }
            }
        },
    );

    let headers = [
        (header::CONTENT_TYPE, output.content_type.to_string()),
        (header::CONTENT_LENGTH, output.size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output.file_name),
        ),
    ];
    tracing::info!(job_id = %id, size = output.size, "Streaming result");

    Ok((headers, Body::from_stream(stream)).into_response())
}

/// DELETE /encode/{id}
#[utoipa::path(
    delete,
    path = "/encode/{id}",
    params(("id" = String, Path, description = "Ticket id")),
    responses(
        (status = 202, description = "Cancelled or cancelling", body = CancelResponse),
        (status = 404, description = "Unknown or purged job"),
        (status = 409, description = "Job already finished")
    )
)]
pub async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_job_id(&id)?;
    let status = match ctx.engine.cancel(id)? {
        JobState::Cancelled => "cancelled",
        _ => "cancelling",
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            ticket_id: id.to_string(),
            status: status.to_string(),
        }),
    ))
}

/// GET /encode/jobs
#[utoipa::path(
    get,
    path = "/encode/jobs",
    responses((status = 200, description = "All jobs, oldest first", body = [JobStatusResponse]))
)]
pub async fn list_jobs(State(ctx): State<AppContext>) -> Json<Vec<JobStatusResponse>> {
    let jobs = ctx
        .engine
        .list()
        .iter()
        .map(JobStatusResponse::from_record)
        .collect();
    Json(jobs)
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let engine = &ctx.engine;
    Json(HealthResponse {
        status: if engine.is_shutting_down() {
            "shutting_down".into()
        } else {
            "ok".into()
        },
        version: env!("CARGO_PKG_VERSION").into(),
        workers: engine.worker_count(),
        running: engine.running_count(),
        queued: engine.queue_depth(),
        queue_capacity: engine.queue_capacity(),
        ffmpeg_available: ctx.tools.require("ffmpeg").is_ok(),
    })
}
