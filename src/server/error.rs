//! Error-to-HTTP response conversion.
//!
//! Wraps [`encoded_core::Error`] so route handlers can return
//! `Result<T, AppError>` and use `?` on engine calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: encoded_core::Error,
}

impl AppError {
    pub fn new(inner: encoded_core::Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &encoded_core::Error {
        &self.inner
    }

    /// Machine-readable error code for the JSON body.
    pub fn code(&self) -> &'static str {
        use encoded_core::Error;
        match &self.inner {
            Error::NotFound { .. } => "not_found",
            Error::NotReady { .. } => "not_ready",
            Error::Validation(_) => "validation_error",
            Error::Capacity { .. } => "queue_full",
            Error::Conflict(_) => "conflict",
            Error::JobFailed { .. } => "job_failed",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<encoded_core::Error> for AppError {
    fn from(e: encoded_core::Error) -> Self {
        Self::new(e)
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::new(encoded_core::Error::Validation(format!(
            "malformed multipart body: {}",
            e.body_text()
        )))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let mut body = json!({
            "error": self.inner.to_string(),
            "code": self.code(),
        });
        if let encoded_core::Error::JobFailed { error, .. } = &self.inner {
            body["failure"] = json!(error);
        }

        (status, axum::Json(body)).into_response()
    }
}
