//! Stream and download route handlers.
//!
//! The identifier is a wildcard segment so full URLs (slashes included) can
//! be passed as-is. A query string on the request belongs to a URL
//! identifier (`.../https://www.youtube.com/watch?v=abc123`) and is glued
//! back on.

use axum::extract::{Extension, Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use spotspof_core::TrackReference;

use crate::context::AppContext;
use crate::delivery::DeliveryMode;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// GET /stream_html/{source}/{*id}
pub async fn stream_html(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path((source, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    deliver(&ctx, DeliveryMode::Redirect, &request_id, &source, &id, query).await
}

/// GET /stream_direct/{source}/{*id}
pub async fn stream_direct(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path((source, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    deliver(&ctx, DeliveryMode::Stream, &request_id, &source, &id, query).await
}

/// GET /download/{source}/{*id}
pub async fn download(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path((source, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    deliver(&ctx, DeliveryMode::Download, &request_id, &source, &id, query).await
}

async fn deliver(
    ctx: &AppContext,
    mode: DeliveryMode,
    request_id: &RequestId,
    source: &str,
    id: &str,
    query: Option<String>,
) -> Result<Response, AppError> {
    let identifier = identifier_with_query(id, query.as_deref());
    let track =
        TrackReference::parse(source, &identifier).map_err(AppError::for_request(request_id))?;

    let delivery = ctx
        .delivery
        .deliver(mode, &track, request_id.as_str())
        .await
        .map_err(AppError::for_request(request_id))?;

    Ok(delivery.into_response())
}

fn identifier_with_query(id: &str, query: Option<&str>) -> String {
    let id = id.trim_start_matches('/');
    match query {
        Some(q) if !q.is_empty() && id.contains(":/") => format!("{id}?{q}"),
        _ => id.to_string(),
    }
}
