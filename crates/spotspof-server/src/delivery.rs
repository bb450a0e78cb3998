//! Delivery Strategy Selector.
//!
//! Each request picks exactly one strategy and runs it to a terminal state:
//!
//! ```text
//! Start ── resolve ──┬─ direct URL ──────────────────────────────> Redirected
//!                    └─ no direct URL ─┬─ live pipe ─ start_pipe ─> Streamed
//!                                      └─ download ── relay_file ─> Streamed
//! any failure ───────────────────────────────────────────────────> Failed
//! ```
//!
//! There is no fallback between strategies: a failed resolve or download is
//! reported, not retried another way. `/download` skips the resolve step and
//! always downloads, since an attachment cannot be served by redirect.

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use spotspof_core::config::StreamConfig;
use spotspof_core::{AudioFormat, Error, Result, TrackReference};
use spotspof_extract::{ArtifactManager, Extractor};

use crate::relay::{relay_file, start_pipe, ByteStream, FileRelay, PipeStart};

/// What the client asked for, by route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// `/stream_html`: redirect or nothing.
    Redirect,
    /// `/stream_direct`: redirect when possible, otherwise proxy the bytes.
    Stream,
    /// `/download`: always a server-side download, served as an attachment.
    Download,
}

/// Terminal states of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Start,
    Redirected,
    Streamed,
    Failed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryState::Start => "start",
            DeliveryState::Redirected => "redirected",
            DeliveryState::Streamed => "streamed",
            DeliveryState::Failed => "failed",
        })
    }
}

/// The chosen strategy, ready to become a response.
pub enum Delivery {
    Redirect {
        location: String,
    },
    File {
        relay: FileRelay,
        mime_type: String,
        attachment: Option<String>,
    },
    Pipe {
        body: ByteStream,
        mime_type: String,
    },
}

impl Delivery {
    pub fn state(&self) -> DeliveryState {
        match self {
            Delivery::Redirect { .. } => DeliveryState::Redirected,
            Delivery::File { .. } | Delivery::Pipe { .. } => DeliveryState::Streamed,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Redirect { location } => {
                f.debug_struct("Redirect").field("location", location).finish()
            }
            Delivery::File {
                relay,
                mime_type,
                attachment,
            } => f
                .debug_struct("File")
                .field("len", &relay.len)
                .field("mime_type", mime_type)
                .field("attachment", attachment)
                .finish(),
            Delivery::Pipe { mime_type, .. } => {
                f.debug_struct("Pipe").field("mime_type", mime_type).finish()
            }
        }
    }
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        match self {
            Delivery::Redirect { location } => match HeaderValue::from_str(&location) {
                Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
                Err(_) => crate::error::AppError::new(Error::resolution_failed(
                    "direct stream URL is not a valid header value",
                ))
                .into_response(),
            },
            Delivery::File {
                relay,
                mime_type,
                attachment,
            } => {
                let mut response = (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, mime_type),
                        (header::CONTENT_LENGTH, relay.len.to_string()),
                        (header::CACHE_CONTROL, "no-store".to_string()),
                    ],
                    Body::from_stream(relay.body),
                )
                    .into_response();
                if let Some(name) = attachment {
                    if let Ok(value) =
                        HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
                    {
                        response
                            .headers_mut()
                            .insert(header::CONTENT_DISPOSITION, value);
                    }
                }
                response
            }
            Delivery::Pipe { body, mime_type } => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime_type),
                    (header::CACHE_CONTROL, "no-store".to_string()),
                ],
                Body::from_stream(body),
            )
                .into_response(),
        }
    }
}

/// Chooses and prepares the delivery for each request.
pub struct DeliverySelector {
    extractor: Arc<dyn Extractor>,
    artifacts: ArtifactManager,
    format: AudioFormat,
    stream: StreamConfig,
}

impl DeliverySelector {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        artifacts: ArtifactManager,
        format: AudioFormat,
        stream: StreamConfig,
    ) -> Self {
        Self {
            extractor,
            artifacts,
            format,
            stream,
        }
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    /// Attachment file name for a downloaded track.
    pub fn attachment_name(&self, track: &TrackReference) -> String {
        format!("{}.{}", track.file_stem(), self.format.extension())
    }

    /// Run the state machine for one request.
    ///
    /// Any temp artifact allocated on the way is owned by the returned
    /// [`Delivery`] (released once its body is consumed or dropped) or has
    /// already been released when an error is returned.
    pub async fn deliver(
        &self,
        mode: DeliveryMode,
        track: &TrackReference,
        request_id: &str,
    ) -> Result<Delivery> {
        tracing::debug!(track = %track, ?mode, state = %DeliveryState::Start, "Delivery");

        let outcome = match mode {
            DeliveryMode::Redirect => self.redirect_only(track).await,
            DeliveryMode::Stream => self.stream(track, request_id).await,
            DeliveryMode::Download => {
                let name = self.attachment_name(track);
                self.download_and_relay(track, request_id, Some(name)).await
            }
        };

        match &outcome {
            Ok(delivery) => {
                tracing::debug!(track = %track, state = %delivery.state(), "Delivery");
            }
            Err(e) => {
                tracing::debug!(track = %track, state = %DeliveryState::Failed, error = %e, "Delivery");
            }
        }
        outcome
    }

    async fn redirect_only(&self, track: &TrackReference) -> Result<Delivery> {
        let resolved = self.extractor.resolve(track).await?;
        match resolved.direct_url {
            Some(location) => Ok(Delivery::Redirect { location }),
            None => Err(Error::resolution_failed(format!(
                "no direct stream URL for {track}"
            ))),
        }
    }

    async fn stream(&self, track: &TrackReference, request_id: &str) -> Result<Delivery> {
        let resolved = self.extractor.resolve(track).await?;
        if let Some(location) = resolved.direct_url {
            return Ok(Delivery::Redirect { location });
        }

        if self.stream.live_pipe {
            let session = self.extractor.open_stream(track).await?;
            tracing::debug!(track = %track, pid = ?session.pid(), "Relaying live pipe");

            // Nothing is committed until the tool has produced output.
            let start = start_pipe(
                session,
                self.stream.pipe_chunk_size,
                self.stream.pipe_idle_timeout(),
            )
            .await?;
            return match start {
                PipeStart::Streaming(body) => Ok(Delivery::Pipe {
                    body,
                    mime_type: resolved.mime_type,
                }),
                PipeStart::Empty { tool, exit } if exit.status.success() => Err(
                    Error::tool_failure(tool, "exited without producing any output"),
                ),
                PipeStart::Empty { tool, exit } => {
                    Err(self.extractor.stream_failure(&tool, exit.message()))
                }
            };
        }

        self.download_and_relay(track, request_id, None).await
    }

    async fn download_and_relay(
        &self,
        track: &TrackReference,
        request_id: &str,
        attachment: Option<String>,
    ) -> Result<Delivery> {
        // Dropped on every early return below, which deletes partial output.
        let artifact = self.artifacts.allocate(&track.file_stem(), request_id)?;

        let downloaded = self
            .extractor
            .download(track, artifact.path(), &self.format)
            .await?;

        if let Some(ref local) = downloaded.local_path {
            if local != artifact.path() {
                return Err(Error::Internal(format!(
                    "extractor wrote {} instead of {}",
                    local.display(),
                    artifact.path().display()
                )));
            }
        }

        let relay = relay_file(artifact, self.stream.file_chunk_size).await?;
        Ok(Delivery::File {
            relay,
            mime_type: downloaded.mime_type,
            attachment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use spotspof_core::{ExtractionReason, Source};
    use spotspof_extract::{ExtractionResult, SearchEntry, StreamSession};
    use std::path::{Path, PathBuf};

    /// Extractor with a fixed resolve answer that writes `payload` on download.
    struct Fake {
        direct_url: Option<String>,
        payload: Option<Vec<u8>>,
        calls: Mutex<Vec<&'static str>>,
        targets: Mutex<Vec<PathBuf>>,
    }

    impl Fake {
        fn new(direct_url: Option<&str>, payload: Option<&[u8]>) -> Arc<Self> {
            Arc::new(Self {
                direct_url: direct_url.map(String::from),
                payload: payload.map(<[u8]>::to_vec),
                calls: Mutex::new(Vec::new()),
                targets: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Extractor for Fake {
        async fn resolve(&self, _track: &TrackReference) -> Result<ExtractionResult> {
            self.calls.lock().push("resolve");
            Ok(match self.direct_url {
                Some(ref url) => ExtractionResult::direct(url, "audio/mp4"),
                None => ExtractionResult::metadata_only("audio/webm"),
            })
        }

        async fn download(
            &self,
            _track: &TrackReference,
            target: &Path,
            format: &AudioFormat,
        ) -> Result<ExtractionResult> {
            self.calls.lock().push("download");
            self.targets.lock().push(target.to_path_buf());
            match self.payload {
                Some(ref bytes) => {
                    std::fs::write(target, bytes)?;
                    Ok(ExtractionResult::local(target, format.mime_type()))
                }
                None => {
                    std::fs::write(target.with_extension("webm.part"), b"partial")?;
                    Err(Error::tool_failure("yt-dlp", "exited with status 1"))
                }
            }
        }

        async fn open_stream(&self, _track: &TrackReference) -> Result<StreamSession> {
            Err(Error::tool_failure("yt-dlp", "not scripted"))
        }

        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchEntry>> {
            Ok(Vec::new())
        }
    }

    fn selector(fake: Arc<Fake>, dir: &Path) -> DeliverySelector {
        DeliverySelector::new(
            fake,
            ArtifactManager::new(dir, "mp3").unwrap(),
            AudioFormat::default(),
            StreamConfig::default(),
        )
    }

    fn youtube() -> TrackReference {
        TrackReference::new(Source::YouTube, "abc123").unwrap()
    }

    fn bandcamp() -> TrackReference {
        TrackReference::new(Source::Bandcamp, "https://artist.bandcamp.com/track/song").unwrap()
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn direct_url_redirects_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(Some("https://cdn.example/abc123.m4a"), Some(b"x"));
        let selector = selector(fake.clone(), dir.path());

        for mode in [DeliveryMode::Redirect, DeliveryMode::Stream] {
            let delivery = selector.deliver(mode, &youtube(), "r1").await.unwrap();
            match delivery {
                Delivery::Redirect { ref location } => {
                    assert_eq!(location, "https://cdn.example/abc123.m4a")
                }
                other => panic!("expected redirect, got {other:?}"),
            }
        }
        assert_eq!(*fake.calls.lock(), ["resolve", "resolve"]);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn redirect_mode_without_direct_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(None, Some(b"x"));
        let selector = selector(fake.clone(), dir.path());

        let err = selector
            .deliver(DeliveryMode::Redirect, &youtube(), "r1")
            .await
            .unwrap_err();
        assert_eq!(
            err.extraction_reason(),
            Some(ExtractionReason::ResolutionFailed)
        );
        assert!(err.to_string().contains("no direct stream URL"));
        assert_eq!(*fake.calls.lock(), ["resolve"]);
    }

    #[tokio::test]
    async fn stream_mode_downloads_when_no_direct_url() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(None, Some(b"mp3-bytes"));
        let selector = selector(fake.clone(), dir.path());

        let delivery = selector
            .deliver(DeliveryMode::Stream, &youtube(), "r1")
            .await
            .unwrap();
        assert_eq!(delivery.state(), DeliveryState::Streamed);
        let Delivery::File {
            relay,
            mime_type,
            attachment,
        } = delivery
        else {
            panic!("expected file relay");
        };
        assert_eq!(mime_type, "audio/mpeg");
        assert!(attachment.is_none());
        let bytes: Vec<u8> = relay
            .body
            .map(|c| c.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(bytes, b"mp3-bytes");
        assert_eq!(*fake.calls.lock(), ["resolve", "download"]);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn download_mode_skips_resolve_and_names_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(Some("https://cdn.example/ignored"), Some(b"mp3"));
        let selector = selector(fake.clone(), dir.path());

        let delivery = selector
            .deliver(DeliveryMode::Download, &bandcamp(), "r1")
            .await
            .unwrap();
        match delivery {
            Delivery::File { ref attachment, .. } => {
                assert_eq!(attachment.as_deref(), Some("song.mp3"))
            }
            ref other => panic!("expected file relay, got {other:?}"),
        }
        assert_eq!(*fake.calls.lock(), ["download"]);
        let target = fake.targets.lock()[0].clone();
        assert!(target.starts_with(dir.path()));
        assert!(target.exists());

        drop(delivery);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn failed_download_removes_partials() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(None, None);
        let selector = selector(fake.clone(), dir.path());

        let err = selector
            .deliver(DeliveryMode::Download, &bandcamp(), "r1")
            .await
            .unwrap_err();
        assert_eq!(err.extraction_reason(), Some(ExtractionReason::ToolFailure));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn live_pipe_failure_is_reported_not_masked() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Fake::new(None, Some(b"mp3"));
        let mut selector = selector(fake.clone(), dir.path());
        selector.stream.live_pipe = true;

        let err = selector
            .deliver(DeliveryMode::Stream, &youtube(), "r1")
            .await
            .unwrap_err();
        assert_eq!(err.extraction_reason(), Some(ExtractionReason::ToolFailure));
        assert_eq!(*fake.calls.lock(), ["resolve"]);
    }

    #[tokio::test]
    async fn redirect_response_is_302() {
        let response = Delivery::Redirect {
            location: "https://cdn.example/a.m4a".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://cdn.example/a.m4a"
        );
    }
}
