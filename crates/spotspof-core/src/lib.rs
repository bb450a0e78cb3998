//! spotspof-core: shared error type, configuration, and track model.
//!
//! This crate is the foundational dependency for the other spotspof crates.

pub mod config;
pub mod error;
pub mod track;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ExtractionReason, Result};
pub use track::{mime_for_extension, AudioFormat, Source, TrackReference};
