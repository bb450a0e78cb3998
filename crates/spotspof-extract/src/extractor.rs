//! The narrow contract between request handling and the extraction backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spotspof_core::{AudioFormat, Error, Result, Source, TrackReference};

use crate::session::StreamSession;

/// What the extraction backend could provide for a track.
///
/// At most one of `direct_url` / `local_path` is populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Directly playable media URL (no server bandwidth needed).
    pub direct_url: Option<String>,
    /// File written by a download.
    pub local_path: Option<PathBuf>,
    pub mime_type: String,
    pub title: Option<String>,
}

impl ExtractionResult {
    /// A lookup that produced a playable URL.
    pub fn direct(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            direct_url: Some(url.into()),
            local_path: None,
            mime_type: mime_type.into(),
            title: None,
        }
    }

    /// A lookup that found the track but no playable URL.
    pub fn metadata_only(mime_type: impl Into<String>) -> Self {
        Self {
            direct_url: None,
            local_path: None,
            mime_type: mime_type.into(),
            title: None,
        }
    }

    /// A completed download.
    pub fn local(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            direct_url: None,
            local_path: Some(path.into()),
            mime_type: mime_type.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub source: Source,
    /// Identifier to use in follow-up routes: the platform ID for YouTube,
    /// the full URL for everything else.
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub duration: Option<String>,
    pub thumbnail: Option<String>,
}

/// A media-resolution backend.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Look up playable-media metadata without writing anything to disk.
    async fn resolve(&self, track: &TrackReference) -> Result<ExtractionResult>;

    /// Fetch and transcode the track into `target`.
    ///
    /// On success `local_path` is `target`. On failure partial files may be
    /// left next to `target`; cleaning them up is the caller's job.
    async fn download(
        &self,
        track: &TrackReference,
        target: &Path,
        format: &AudioFormat,
    ) -> Result<ExtractionResult>;

    /// Start a process that writes the media bytes to its stdout.
    async fn open_stream(&self, track: &TrackReference) -> Result<StreamSession>;

    /// Error for a stream process that exited unsuccessfully before writing
    /// any output. `message` is the tool's own complaint.
    fn stream_failure(&self, tool: &str, message: String) -> Error {
        Error::tool_failure(tool, message)
    }

    /// Free-text search.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchEntry>>;
}
