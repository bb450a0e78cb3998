//! Error-to-HTTP response conversion.
//!
//! [`AppError`] wraps [`spotspof_core::Error`] so route handlers can return
//! `Result<T, AppError>` and use `?` on core and extract results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::RequestId;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: spotspof_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: spotspof_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn inner(&self) -> &spotspof_core::Error {
        &self.inner
    }

    /// `map_err` adapter tagging errors with the request's id.
    pub fn for_request(id: &RequestId) -> impl FnOnce(spotspof_core::Error) -> AppError + '_ {
        move |e| AppError::new(e).with_request_id(id.as_str())
    }
}

impl From<spotspof_core::Error> for AppError {
    fn from(e: spotspof_core::Error) -> Self {
        Self::new(e)
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
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "Server error in handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request failed");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
