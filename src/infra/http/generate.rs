use axum::{
    Extension, Json,
    extract::{Path, RawQuery, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::json;
use url::form_urlencoded;

use crate::application::error::HttpError;
use crate::application::pipeline::GenerateCommand;

use super::{HttpState, RequestContext};

const SOURCE: &str = "infra::http::generate";

/// Header carrying the access key.
pub(super) const KEY_HEADER: &str = "dmp_key";
/// Accepted alias for [`KEY_HEADER`].
pub(super) const KEY_HEADER_ALIAS: &str = "x-api-key";

pub(super) async fn generate_for_template(
    State(state): State<HttpState>,
    Path(template_id): Path<String>,
    Extension(ctx): Extension<RequestContext>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    run(
        &state,
        Some(ctx.request_id),
        &headers,
        query.as_deref(),
        Some(template_id),
        body,
    )
    .await
}

pub(super) async fn generate_without_template(
    State(state): State<HttpState>,
    Extension(ctx): Extension<RequestContext>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    run(
        &state,
        Some(ctx.request_id),
        &headers,
        query.as_deref(),
        None,
        body,
    )
    .await
}

/// Handles `/templates//generate`, which the router cannot match by parameter.
pub(super) async fn generate_blank_template(state: HttpState, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .extensions
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone());

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
                &err,
            )
            .into_response();
        }
    };

    run(
        &state,
        request_id,
        &parts.headers,
        parts.uri.query(),
        None,
        body,
    )
    .await
}

pub(super) fn is_blank_template_path(path: &str) -> bool {
    path.strip_prefix("/templates/")
        .and_then(|rest| rest.strip_suffix("/generate"))
        .is_some_and(|id| id.trim_matches('/').is_empty())
}

async fn run(
    state: &HttpState,
    request_id: Option<String>,
    headers: &HeaderMap,
    query: Option<&str>,
    template_id: Option<String>,
    body: Bytes,
) -> Response {
    let command = GenerateCommand {
        key_value: access_key(headers),
        template_id,
        format: query.and_then(format_param),
        body,
        request_id,
    };

    match state.pipeline.generate(command).await {
        Ok(artifact) => (StatusCode::OK, Json(json!({ "path": artifact.url }))).into_response(),
        Err(err) => err.into_response(),
    }
}

fn access_key(headers: &HeaderMap) -> Option<String> {
    [KEY_HEADER, KEY_HEADER_ALIAS]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn format_param(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "format")
        .map(|(_, value)| value.into_owned())
}
