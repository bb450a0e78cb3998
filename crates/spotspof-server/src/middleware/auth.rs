//! HTTP Basic authentication middleware.
//!
//! Applied to every route except `/health`. Credentials come from
//! `[auth]` in the config (or the `SPOTSPOF_USERNAME` / `SPOTSPOF_PASSWORD`
//! environment variables); a bcrypt `password_hash` takes precedence over
//! the plain password. Failures answer 401 with a `WWW-Authenticate`
//! challenge so browsers prompt for credentials.

use axum::extract::State;
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use spotspof_core::config::AuthConfig;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Decode an `Authorization: Basic <base64(user:pass)>` header value.
pub fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Check a username/password pair against the auth config.
pub fn check_credentials(auth: &AuthConfig, username: &str, password: &str) -> bool {
    if !constant_time_eq(username.as_bytes(), auth.username.as_bytes()) {
        return false;
    }
    match auth.password_hash {
        Some(ref hash) => bcrypt::verify(password, hash).unwrap_or(false),
        None => constant_time_eq(password.as_bytes(), auth.password.as_bytes()),
    }
}

/// bcrypt hash suitable for `auth.password_hash`.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authentication middleware. Passes everything through when auth is disabled.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let auth = &ctx.config.auth;
    if !auth.enabled {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
        .is_some_and(|(user, pass)| check_credentials(auth, &user, &pass));

    if authorized {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");

    let mut err = AppError::new(spotspof_core::Error::Unauthorized(
        "authentication required".into(),
    ));
    if let Some(id) = request.extensions().get::<RequestId>() {
        err = err.with_request_id(id.as_str());
    }
    let mut response = err.into_response();
    let challenge = format!("Basic realm=\"{}\", charset=\"UTF-8\"", auth.realm);
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}
