//! HTTP surface: the generation endpoint plus health and artifact routes.

mod files;
mod generate;
mod middleware;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{Method, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;
use crate::application::pipeline::GenerationPipeline;
use crate::infra::db::PostgresRepositories;
use crate::infra::storage::FilesystemObjectStorage;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<GenerationPipeline>,
    /// Absent when the service runs without a database (tests, local tooling).
    pub db: Option<Arc<PostgresRepositories>>,
    /// Present when artifacts are stored on the local filesystem.
    pub files: Option<Arc<FilesystemObjectStorage>>,
    pub max_body_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    let generate_routes = Router::new()
        .route(
            "/templates/{template_id}/generate",
            post(generate::generate_for_template),
        )
        .route("/templates/generate", post(generate::generate_without_template))
        .layer(DefaultBodyLimit::max(max_body_bytes));

    Router::new()
        .merge(generate_routes)
        .route("/health", get(health))
        .route("/files/{*path}", get(files::serve_file))
        .fallback(fallback)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health(State(state): State<HttpState>) -> Response {
    match state.db.as_ref() {
        Some(db) => db_health_response(db.health_check().await),
        None => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_message("infra::http::health", "no database configured")
                .attach(&mut response);
            response
        }
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error("infra::http::health", &err).attach(&mut response);
            response
        }
    }
}

async fn fallback(State(state): State<HttpState>, request: Request) -> Response {
    // `/templates//generate` never matches the `{template_id}` route.
    if request.method() == Method::POST && generate::is_blank_template_path(request.uri().path()) {
        return generate::generate_blank_template(state, request).await;
    }

    let path = request.uri().path().to_string();

    let mut response = (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Not found" })),
    )
        .into_response();
    ErrorReport::from_message("infra::http::fallback", format!("no route for {path}"))
        .attach(&mut response);
    response
}
