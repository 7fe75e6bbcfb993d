//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use super::context::AppContext;
use super::routes;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "encoded API",
        description = "Upload media, poll the job, download the encode",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    paths(
        routes::start_encode,
        routes::job_status,
        routes::job_result,
        routes::cancel_job,
        routes::list_jobs,
        routes::health,
    ),
    components(schemas(
        routes::StartForm,
        routes::StartResponse,
        routes::FailureResponse,
        routes::JobStatusResponse,
        routes::CancelResponse,
        routes::HealthResponse,
    ))
)]
pub struct ApiDoc;

/// GET /api/openapi.json
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = ctx.config.server.max_upload_bytes();

    let encode_routes = Router::new()
        .route(
            "/start",
            post(routes::start_encode).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/status/{id}", get(routes::job_status))
        .route("/result/{id}", get(routes::job_result))
        .route("/jobs", get(routes::list_jobs))
        .route("/{id}", delete(routes::cancel_job));

    Router::new()
        .nest("/encode", encode_routes)
        .route("/health", get(routes::health))
        .route("/api/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}
