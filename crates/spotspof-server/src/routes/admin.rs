//! Admin route handlers.

use axum::extract::{Extension, State};
use axum::Json;
use spotspof_extract::ToolInfo;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// GET /admin/tools
///
/// Runs each tool's version command, so it is done on the blocking pool.
pub async fn tools(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<Vec<ToolInfo>>, AppError> {
    let registry = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || registry.check_all())
        .await
        .map_err(|e| spotspof_core::Error::Internal(format!("spawn_blocking join error: {e}")))
        .map_err(AppError::for_request(&request_id))?;
    Ok(Json(infos))
}
