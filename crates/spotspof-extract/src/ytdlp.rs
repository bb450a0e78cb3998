//! [`Extractor`] backed by the `yt-dlp` command-line tool.
//!
//! Every invocation disables playlist expansion and warnings. Lookups use
//! `-J` (single JSON document on stdout); downloads let yt-dlp extract and
//! transcode the audio (through ffmpeg) into the caller's target path; live
//! streams write the selected format to stdout with `-o -`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use spotspof_core::config::ExtractionConfig;
use spotspof_core::{mime_for_extension, AudioFormat, Error, Result, Source, TrackReference};

use crate::command::{ToolCommand, ToolOutput};
use crate::extractor::{ExtractionResult, Extractor, SearchEntry};
use crate::session::StreamSession;
use crate::tools::{ToolRegistry, FFMPEG, YTDLP};

/// stderr fragments that mean "the track does not exist / cannot be described".
const RESOLUTION_FAILURE_MARKERS: &[&str] = &[
    "Unsupported URL",
    "Video unavailable",
    "is not available",
    "Private video",
    "HTTP Error 404",
    "Unable to extract",
    "does not exist",
    "is not a valid URL",
    "No video formats found",
    "Requested format is not available",
];

/// Runs yt-dlp as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    ffmpeg: Option<PathBuf>,
    format: String,
    resolve_timeout: Duration,
    download_timeout: Duration,
}

impl YtDlpExtractor {
    /// Extractor with default format selection and timeouts.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            program: program.into(),
            ffmpeg: None,
            format: defaults.format.clone(),
            resolve_timeout: defaults.resolve_timeout(),
            download_timeout: defaults.timeout(),
        }
    }

    /// Build from discovered tools and the extraction settings.
    ///
    /// A missing yt-dlp is not fatal here: the bare program name is used and
    /// every call fails with a tool failure until it is installed.
    pub fn from_config(tools: &ToolRegistry, config: &ExtractionConfig) -> Self {
        let program = match tools.require(YTDLP) {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                tracing::warn!("{e}");
                PathBuf::from(YTDLP)
            }
        };

        Self {
            program,
            ffmpeg: tools.get(FFMPEG).map(Path::to_path_buf),
            format: config.format.clone(),
            resolve_timeout: config.resolve_timeout(),
            download_timeout: config.timeout(),
        }
    }

    pub fn with_timeouts(mut self, resolve: Duration, download: Duration) -> Self {
        self.resolve_timeout = resolve;
        self.download_timeout = download;
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = Some(ffmpeg.into());
        self
    }

    fn base_command(&self, timeout: Duration) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(["--no-playlist", "--no-warnings", "--no-progress"])
            .timeout(timeout);
        cmd
    }

    pub(crate) fn resolve_command(&self, track: &TrackReference) -> ToolCommand {
        let mut cmd = self.base_command(self.resolve_timeout);
        cmd.args(["-J", "-f", self.format.as_str()])
            .args(["--", track.canonical_url()]);
        cmd
    }

    pub(crate) fn download_command(
        &self,
        track: &TrackReference,
        target: &Path,
        format: &AudioFormat,
    ) -> ToolCommand {
        let template = target.with_extension("%(ext)s");
        let mut cmd = self.base_command(self.download_timeout);
        cmd.args(["--quiet", "--force-overwrites", "-f", self.format.as_str()])
            .args(["-x", "--audio-format", format.codec.as_str()])
            .arg("--audio-quality")
            .arg(format!("{}K", format.bitrate_kbps))
            .arg("-o")
            .arg(template.to_string_lossy());
        if let Some(ref ffmpeg) = self.ffmpeg {
            cmd.arg("--ffmpeg-location").arg(ffmpeg.to_string_lossy());
        }
        cmd.args(["--", track.canonical_url()]);
        cmd
    }

    pub(crate) fn stream_command(&self, track: &TrackReference) -> ToolCommand {
        let mut cmd = self.base_command(self.download_timeout);
        cmd.args(["--quiet", "-f", self.format.as_str(), "-o", "-"])
            .args(["--", track.canonical_url()]);
        cmd
    }

    pub(crate) fn search_command(&self, query: &str, limit: u32) -> ToolCommand {
        let mut cmd = self.base_command(self.resolve_timeout);
        cmd.args(["-J", "--flat-playlist"])
            .arg("--")
            .arg(format!("ytsearch{limit}:{query}"));
        cmd
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn resolve(&self, track: &TrackReference) -> Result<ExtractionResult> {
        let output = self.resolve_command(track).output().await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }
        parse_resolve(&output.stdout)
    }

    async fn download(
        &self,
        track: &TrackReference,
        target: &Path,
        format: &AudioFormat,
    ) -> Result<ExtractionResult> {
        let output = self.download_command(track, target, format).output().await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }

        match tokio::fs::metadata(target).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                tracing::debug!(
                    track = %track,
                    path = %target.display(),
                    bytes = meta.len(),
                    "Download complete"
                );
                Ok(ExtractionResult::local(target, format.mime_type()))
            }
            _ => Err(Error::tool_failure(
                YTDLP,
                format!("exited successfully but did not produce {}", target.display()),
            )),
        }
    }

    async fn open_stream(&self, track: &TrackReference) -> Result<StreamSession> {
        self.stream_command(track).spawn_stream()
    }

    fn stream_failure(&self, _tool: &str, message: String) -> Error {
        if is_resolution_failure(&message) {
            Error::resolution_failed(message)
        } else {
            Error::tool_failure(YTDLP, message)
        }
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchEntry>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("search query is empty".into()));
        }
        let output = self.search_command(query, limit.max(1)).output().await?;
        if !output.status.success() {
            return Err(Error::tool_failure(YTDLP, failure_message(&output)));
        }
        parse_search(&output.stdout)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(rename = "_type")]
    kind: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchJson {
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    duration_string: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

fn parse_resolve(stdout: &str) -> Result<ExtractionResult> {
    let info: InfoJson = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::tool_failure(YTDLP, format!("unexpected metadata output: {e}")))?;

    if info.kind.as_deref() == Some("playlist") {
        return Err(Error::resolution_failed(
            "reference points to a playlist, not a single track",
        ));
    }

    let mime = mime_for_extension(info.ext.as_deref().unwrap_or(""));
    let result = match info.url.filter(|u| !u.trim().is_empty()) {
        Some(url) => ExtractionResult::direct(url, mime),
        None => ExtractionResult::metadata_only(mime),
    };
    Ok(result.with_title(info.title))
}

fn parse_search(stdout: &str) -> Result<Vec<SearchEntry>> {
    let parsed: SearchJson = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::tool_failure(YTDLP, format!("unexpected search output: {e}")))?;

    Ok(parsed
        .entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let page_url = entry.webpage_url.or(entry.url);
            let source = page_url
                .as_deref()
                .map(Source::from_webpage_url)
                .unwrap_or(Source::Generic);
            let id = match source {
                Source::YouTube => entry.id.or_else(|| page_url.clone()),
                _ => page_url.clone(),
            }?;
            let thumbnail = entry
                .thumbnail
                .or_else(|| entry.thumbnails.into_iter().rev().find_map(|t| t.url));
            let duration = entry
                .duration_string
                .or_else(|| entry.duration.map(format_duration));

            Some(SearchEntry {
                source,
                id,
                title: entry.title,
                url: page_url,
                duration,
                thumbnail,
            })
        })
        .collect())
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

/// Last `ERROR:` line of stderr, or the trimmed stderr.
fn failure_message(output: &ToolOutput) -> String {
    let stderr = output.stderr.trim();
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .unwrap_or(stderr);
    if message.is_empty() {
        format!("exited with status {}", output.status)
    } else {
        message.to_string()
    }
}

/// Whether `stderr` says the track itself is the problem rather than the tool.
fn is_resolution_failure(stderr: &str) -> bool {
    RESOLUTION_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
}

fn classify_failure(output: &ToolOutput) -> Error {
    let message = failure_message(output);
    if is_resolution_failure(&output.stderr) {
        Error::resolution_failed(message)
    } else {
        Error::tool_failure(YTDLP, message)
    }
}
