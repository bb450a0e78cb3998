//! Route handlers for the HTTP surface.

pub mod admin;
pub mod health;
pub mod queue;
pub mod search;
pub mod stream;
