//! Track references and the transcode target format.
//!
//! A [`TrackReference`] can only be built through [`TrackReference::new`],
//! which maps the `(source, identifier)` pair to exactly one canonical URL.
//! Anything that cannot be mapped is rejected with
//! `ExtractionReason::UnsupportedSource` before any external call is made.
//!
//! Identifier contract:
//! - `YouTube`: a platform video ID (`[A-Za-z0-9_-]+`) or a full `http(s)` URL.
//! - `Bandcamp`: a full `http(s)` URL on a `bandcamp.com` host. Slugs are rejected.
//! - `Generic`: any full `http(s)` URL.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const MAX_FILE_STEM_LEN: usize = 80;

/// Platform a track comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    YouTube,
    Bandcamp,
    Generic,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::YouTube => "YouTube",
            Source::Bandcamp => "Bandcamp",
            Source::Generic => "Generic",
        }
    }

    /// Classify a webpage URL by host.
    pub fn from_webpage_url(url: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        match host.as_deref() {
            Some(h) if h == "youtu.be" || h == "youtube.com" || h.ends_with(".youtube.com") => {
                Source::YouTube
            }
            Some(h) if h == "bandcamp.com" || h.ends_with(".bandcamp.com") => Source::Bandcamp,
            _ => Source::Generic,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Source::YouTube),
            "bandcamp" => Ok(Source::Bandcamp),
            "generic" => Ok(Source::Generic),
            _ => Err(Error::unsupported_source(format!("unknown source '{s}'"))),
        }
    }
}

/// A validated `(source, identifier)` pair with its canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReference {
    source: Source,
    identifier: String,
    canonical_url: String,
}

impl TrackReference {
    /// Validate the pair and compute its canonical URL.
    pub fn new(source: Source, identifier: impl Into<String>) -> Result<Self> {
        let identifier = repair_collapsed_scheme(identifier.into().trim());
        if identifier.is_empty() {
            return Err(Error::unsupported_source("empty track identifier"));
        }

        let canonical_url = match source {
            Source::YouTube => {
                if looks_like_url(&identifier) {
                    parse_http_url(&identifier)?;
                    identifier.clone()
                } else if is_platform_id(&identifier) {
                    format!("{YOUTUBE_WATCH_URL}{identifier}")
                } else {
                    return Err(Error::unsupported_source(format!(
                        "'{identifier}' is not a YouTube video id or URL"
                    )));
                }
            }
            Source::Bandcamp => {
                let url = parse_http_url(&identifier).map_err(|_| {
                    Error::unsupported_source(format!(
                        "Bandcamp identifiers must be full track URLs, got '{identifier}'"
                    ))
                })?;
                if Source::from_webpage_url(url.as_str()) != Source::Bandcamp {
                    return Err(Error::unsupported_source(format!(
                        "'{identifier}' is not a bandcamp.com URL"
                    )));
                }
                identifier.clone()
            }
            Source::Generic => {
                parse_http_url(&identifier)?;
                identifier.clone()
            }
        };

        Ok(Self {
            source,
            identifier,
            canonical_url,
        })
    }

    /// Parse both halves from raw path segments.
    pub fn parse(source: &str, identifier: &str) -> Result<Self> {
        Self::new(source.parse()?, identifier)
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The URL handed to the external tool. Never empty.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Filesystem-safe stem derived from the identifier.
    ///
    /// URLs contribute their last non-empty path segment, plain IDs are used
    /// as-is. Disallowed characters become `_`.
    pub fn file_stem(&self) -> String {
        let raw = if looks_like_url(&self.identifier) {
            url::Url::parse(&self.identifier)
                .ok()
                .and_then(|u| {
                    u.path_segments()
                        .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(String::from))
                        .or_else(|| u.host_str().map(String::from))
                })
                .unwrap_or_default()
        } else {
            self.identifier.clone()
        };

        let stem: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_FILE_STEM_LEN)
            .collect();

        let stem = stem.trim_matches('.').to_string();
        if stem.is_empty() {
            "track".to_string()
        } else {
            stem
        }
    }
}

impl fmt::Display for TrackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.identifier)
    }
}

/// Fixed transcode target for downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// Codec / container name understood by the extraction tool (e.g. `mp3`).
    pub codec: String,
    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            codec: "mp3".into(),
            bitrate_kbps: 192,
        }
    }
}

impl AudioFormat {
    /// File extension of the transcoded artifact.
    pub fn extension(&self) -> &str {
        &self.codec
    }

    /// MIME type of the transcoded artifact.
    pub fn mime_type(&self) -> &'static str {
        mime_for_extension(&self.codec)
    }
}

/// Map a media file extension to a MIME type.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "opus" | "ogg" | "oga" => "audio/ogg",
        "webm" | "weba" => "audio/webm",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

fn looks_like_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn parse_http_url(s: &str) -> Result<url::Url> {
    let url = url::Url::parse(s)
        .map_err(|e| Error::unsupported_source(format!("invalid URL '{s}': {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(Error::unsupported_source(format!(
            "'{s}' is not an http(s) URL"
        ))),
    }
}

fn is_platform_id(s: &str) -> bool {
    s.len() <= 64
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Path normalisers collapse `https://host` into `https:/host`.
fn repair_collapsed_scheme(s: &str) -> String {
    for scheme in ["https:/", "http:/"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            if !rest.starts_with('/') {
                return format!("{scheme}/{rest}");
            }
        }
    }
    s.to_string()
}
