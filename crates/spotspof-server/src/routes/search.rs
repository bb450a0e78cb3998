//! Search route handlers.

use axum::extract::{Extension, Query, State};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use spotspof_core::Error;
use spotspof_extract::SearchEntry;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

const MAX_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
}

/// A search hit plus ready-made links into the stream and download routes.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub entry: SearchEntry,
    pub links: TrackLinks,
}

#[derive(Debug, Serialize)]
pub struct TrackLinks {
    pub stream_html: String,
    pub stream_direct: String,
    pub download: String,
}

impl TrackLinks {
    pub fn for_entry(entry: &SearchEntry) -> Self {
        let tail = format!("{}/{}", entry.source, entry.id);
        Self {
            stream_html: format!("/stream_html/{tail}"),
            stream_direct: format!("/stream_direct/{tail}"),
            download: format!("/download/{tail}"),
        }
    }
}

/// GET /search?query=...
pub async fn search_get(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    run_search(&ctx, &request_id, params).await
}

/// POST /search (form field `query`)
pub async fn search_post(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Form(params): Form<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    run_search(&ctx, &request_id, params).await
}

async fn run_search(
    ctx: &AppContext,
    request_id: &RequestId,
    params: SearchParams,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(AppError::for_request(request_id)(Error::Validation(
            "query must not be empty".into(),
        )));
    }
    let limit = params
        .limit
        .unwrap_or(ctx.config.extraction.search_results)
        .clamp(1, MAX_LIMIT);

    let entries = ctx
        .extractor
        .search(&query, limit)
        .await
        .map_err(AppError::for_request(request_id))?;

    tracing::debug!(query = %query, hits = entries.len(), "Search complete");

    let results = entries
        .into_iter()
        .map(|entry| SearchResult {
            links: TrackLinks::for_entry(&entry),
            entry,
        })
        .collect();

    Ok(Json(SearchResponse { query, results }))
}
