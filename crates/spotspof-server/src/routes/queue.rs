//! Playlist queue route handlers.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use spotspof_core::{Error, TrackReference};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::queue::QueueEntry;

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub capacity: usize,
    pub len: usize,
    pub entries: Vec<QueueEntry>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub source: String,
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub position: usize,
    pub entry: QueueEntry,
}

/// GET /queue
pub async fn list_queue(State(ctx): State<AppContext>) -> Json<QueueResponse> {
    let entries = ctx.queue.list();
    Json(QueueResponse {
        capacity: ctx.queue.capacity(),
        len: entries.len(),
        entries,
    })
}

/// POST /queue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let track = TrackReference::parse(&payload.source, &payload.id)
        .map_err(AppError::for_request(&request_id))?;
    let entry = QueueEntry::new(&track, payload.title);
    let position = ctx
        .queue
        .push(entry.clone())
        .map_err(AppError::for_request(&request_id))?;

    tracing::info!(track = %track, position, "Track queued");
    Ok((StatusCode::CREATED, Json(EnqueueResponse { position, entry })))
}

/// POST /queue/next
///
/// Pops the head of the queue; `204` when the queue is empty.
pub async fn next(State(ctx): State<AppContext>) -> Response {
    match ctx.queue.pop_front() {
        Some(entry) => Json(entry).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// DELETE /queue/{entry_id}
pub async fn remove(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(entry_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id: Uuid = entry_id
        .parse()
        .map_err(|_| Error::Validation(format!("invalid queue entry id '{entry_id}'")))
        .map_err(AppError::for_request(&request_id))?;

    if ctx.queue.remove(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::for_request(&request_id)(Error::not_found(
            "queue entry",
            id,
        )))
    }
}

/// DELETE /queue
pub async fn clear(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    let removed = ctx.queue.clear();
    Json(serde_json::json!({ "removed": removed }))
}
