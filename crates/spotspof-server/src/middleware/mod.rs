//! HTTP middleware: request ID and Basic authentication.

pub mod auth;
pub mod request_id;
