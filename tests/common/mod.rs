//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] around a
//! scripted [`MockExtractor`] and a private temp artifact directory. Requests
//! can be driven in-process with [`TestHarness::send`] or over a real socket
//! after [`TestHarness::with_server`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use base64::Engine;
use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::ServiceExt;

use spotspof_core::config::Config;
use spotspof_core::{AudioFormat, Error, Result, TrackReference};
use spotspof_extract::{
    ExtractionResult, Extractor, SearchEntry, StreamSession, ToolCommand, ToolRegistry,
};
use spotspof_server::context::AppContext;
use spotspof_server::router::build_router;

/// What a scripted download does.
#[derive(Debug, Clone)]
pub enum DownloadScript {
    /// Write these bytes to the target and succeed.
    Write(Vec<u8>),
    /// Leave a partial file next to the target, then fail like yt-dlp does.
    FailAfterPartial,
}

/// One recorded download call.
#[derive(Debug, Clone)]
pub struct DownloadCall {
    pub track: String,
    pub target: PathBuf,
    pub format: AudioFormat,
}

/// Extractor whose answers are set by the test.
pub struct MockExtractor {
    pub direct_url: Mutex<Option<String>>,
    pub resolve_mime: Mutex<String>,
    pub resolve_error: Mutex<Option<fn() -> Error>>,
    pub download: Mutex<DownloadScript>,
    pub download_delay: Mutex<Duration>,
    /// Shell script whose stdout becomes the live stream.
    pub stream_script: Mutex<Option<String>>,
    pub search_results: Mutex<Vec<SearchEntry>>,
    pub calls: Mutex<Vec<String>>,
    pub downloads: Mutex<Vec<DownloadCall>>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self {
            direct_url: Mutex::new(None),
            resolve_mime: Mutex::new("audio/webm".into()),
            resolve_error: Mutex::new(None),
            download: Mutex::new(DownloadScript::Write(b"mock-mp3-bytes".to_vec())),
            download_delay: Mutex::new(Duration::ZERO),
            stream_script: Mutex::new(None),
            search_results: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }
}

impl MockExtractor {
    pub fn with_direct_url(self, url: &str) -> Self {
        *self.direct_url.lock() = Some(url.to_string());
        self
    }

    pub fn with_download(self, script: DownloadScript) -> Self {
        *self.download.lock() = script;
        self
    }

    pub fn with_download_delay(self, delay: Duration) -> Self {
        *self.download_delay.lock() = delay;
        self
    }

    pub fn with_stream_script(self, script: &str) -> Self {
        *self.stream_script.lock() = Some(script.to_string());
        self
    }

    pub fn with_search_results(self, results: Vec<SearchEntry>) -> Self {
        *self.search_results.lock() = results;
        self
    }

    pub fn with_resolve_error(self, make: fn() -> Error) -> Self {
        *self.resolve_error.lock() = Some(make);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn downloads(&self) -> Vec<DownloadCall> {
        self.downloads.lock().clone()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn resolve(&self, track: &TrackReference) -> Result<ExtractionResult> {
        self.calls.lock().push(format!("resolve {track}"));
        if let Some(make) = *self.resolve_error.lock() {
            return Err(make());
        }
        let mime = self.resolve_mime.lock().clone();
        let direct = self.direct_url.lock().clone();
        Ok(match direct {
            Some(url) => ExtractionResult::direct(url, mime),
            None => ExtractionResult::metadata_only(mime),
        })
    }

    async fn download(
        &self,
        track: &TrackReference,
        target: &Path,
        format: &AudioFormat,
    ) -> Result<ExtractionResult> {
        self.calls.lock().push(format!("download {track}"));
        self.downloads.lock().push(DownloadCall {
            track: track.to_string(),
            target: target.to_path_buf(),
            format: format.clone(),
        });

        let delay = *self.download_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.download.lock().clone();
        match script {
            DownloadScript::Write(bytes) => {
                tokio::fs::write(target, bytes).await?;
                Ok(ExtractionResult::local(target, format.mime_type()))
            }
            DownloadScript::FailAfterPartial => {
                tokio::fs::write(target.with_extension("webm.part"), b"partial").await?;
                Err(Error::tool_failure(
                    "yt-dlp",
                    "ERROR: unable to download video data: HTTP Error 403: Forbidden",
                ))
            }
        }
    }

    async fn open_stream(&self, track: &TrackReference) -> Result<StreamSession> {
        self.calls.lock().push(format!("open_stream {track}"));
        let script = self
            .stream_script
            .lock()
            .clone()
            .ok_or_else(|| Error::tool_failure("yt-dlp", "no stream scripted"))?;
        ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", script.as_str()])
            .spawn_stream()
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchEntry>> {
        self.calls.lock().push(format!("search {query} {limit}"));
        Ok(self
            .search_results
            .lock()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub extractor: Arc<MockExtractor>,
    pub artifact_dir: PathBuf,
    _temp: tempfile::TempDir,
}

impl TestHarness {
    /// Harness with auth disabled and a default mock.
    pub fn new() -> Self {
        Self::with_extractor(MockExtractor::default())
    }

    pub fn with_extractor(extractor: MockExtractor) -> Self {
        Self::build(extractor, |_| {})
    }

    /// Harness with a config tweaked by `configure` (auth starts disabled).
    pub fn build(extractor: MockExtractor, configure: impl FnOnce(&mut Config)) -> Self {
        let temp = tempfile::tempdir().expect("failed to create temp dir");
        let artifact_dir = temp.path().join("artifacts");

        let mut config = Config::default();
        config.auth.enabled = false;
        config.stream.temp_dir = artifact_dir.clone();
        configure(&mut config);

        let extractor = Arc::new(extractor);
        let ctx = AppContext::new(config, extractor.clone(), ToolRegistry::default())
            .expect("failed to build context");

        Self {
            ctx,
            extractor,
            artifact_dir,
            _temp: temp,
        }
    }

    /// Drive one request through the router in-process.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        build_router(self.ctx.clone())
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Start Axum on a random port.
    pub async fn with_server(self) -> (Self, SocketAddr) {
        let app = build_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Files currently in the artifact directory.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.artifact_dir)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    /// Poll until the artifact directory is empty or `timeout` passes.
    pub async fn wait_for_no_artifacts(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.artifacts().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

pub fn basic_auth(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
    )
}
