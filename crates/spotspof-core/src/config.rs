//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries all
//! sub-configs for server, auth, tools, extraction, streaming and the queue.
//! Every section defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::track::AudioFormat;

/// Environment variable overriding `auth.username`.
pub const ENV_USERNAME: &str = "SPOTSPOF_USERNAME";
/// Environment variable overriding `auth.password`.
pub const ENV_PASSWORD: &str = "SPOTSPOF_PASSWORD";

const DEFAULT_PATHS: &[&str] = &["./spotspof.toml", "~/.config/spotspof/config.toml"];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tools: ToolsConfig,
    pub extraction: ExtractionConfig,
    pub transcode: AudioFormat,
    pub stream: StreamConfig,
    pub queue: QueueConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string and check it.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| Error::Config(format!("parse error: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Load from an explicit path, or from the default locations, or fall
    /// back to defaults. Environment overrides are applied last.
    pub fn load_or_default(custom_path: Option<&Path>) -> Result<Self> {
        let mut config = match custom_path {
            Some(path) => Self::load(path)?,
            None => {
                let found = DEFAULT_PATHS.iter().find_map(|p| {
                    let expanded = shellexpand::tilde(p);
                    let path = PathBuf::from(expanded.as_ref());
                    path.exists().then_some(path)
                });
                match found {
                    Some(path) => {
                        tracing::info!("Loading config from {}", path.display());
                        Self::load(&path)?
                    }
                    None => {
                        tracing::info!("No config file found; using defaults");
                        Self::default()
                    }
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SPOTSPOF_USERNAME` / `SPOTSPOF_PASSWORD` from the given lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.auth.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|v| !v.is_empty()) {
            self.auth.password = password;
            // An explicit password in the environment wins over a stored hash.
            self.auth.password_hash = None;
        }
    }

    /// Fatal configuration problems.
    pub fn check(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::Config("server.port cannot be 0".into()));
        }
        if self.stream.file_chunk_size == 0 || self.stream.pipe_chunk_size == 0 {
            return Err(Error::Config("stream chunk sizes must be positive".into()));
        }
        if self.transcode.bitrate_kbps == 0 {
            return Err(Error::Config("transcode.bitrate_kbps must be positive".into()));
        }
        if self.transcode.codec.is_empty()
            || !self.transcode.codec.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Config(format!(
                "transcode.codec '{}' is not a valid codec name",
                self.transcode.codec
            )));
        }
        if self.queue.capacity == 0 {
            return Err(Error::Config("queue.capacity must be positive".into()));
        }
        Ok(())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.auth.enabled {
            if self.auth.password_hash.is_none() && self.auth.password == default_password() {
                warnings.push(format!(
                    "auth uses the default password; set {ENV_PASSWORD} or auth.password_hash"
                ));
            }
        } else {
            warnings.push("auth is disabled; every route is public".into());
        }

        if let Some(ref dir) = self.server.static_dir {
            if !dir.exists() {
                warnings.push(format!("server.static_dir {} does not exist", dir.display()));
            }
        }

        if self.extraction.resolve_timeout_secs > self.extraction.timeout_secs {
            warnings.push(
                "extraction.resolve_timeout_secs exceeds extraction.timeout_secs".into(),
            );
        }

        if self.stream.pipe_chunk_size > self.stream.file_chunk_size * 16 {
            warnings.push("stream.pipe_chunk_size is unusually large".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Frontend build served as the fallback service.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            static_dir: None,
        }
    }
}

/// HTTP Basic authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub username: String,
    /// Plain password, used when `password_hash` is unset.
    pub password: String,
    /// Bcrypt hash (generate with `spotspof hash-password`).
    pub password_hash: Option<String>,
    pub realm: String,
}

fn default_password() -> String {
    "password".into()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            username: "admin".into(),
            password: default_password(),
            password_hash: None,
            realm: "spotspof".into(),
        }
    }
}

/// Paths to external tools. Unset means "look in PATH".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
}

/// Settings for calls into the extraction tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Budget for a download/transcode run.
    pub timeout_secs: u64,
    /// Budget for a metadata lookup or search.
    pub resolve_timeout_secs: u64,
    /// Format selector passed to the tool.
    pub format: String,
    /// Number of search results requested.
    pub search_results: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            resolve_timeout_secs: 60,
            format: "bestaudio/best".into(),
            search_results: 10,
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }
}

/// Relay and temp artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Shared directory for temp artifacts.
    pub temp_dir: PathBuf,
    pub file_chunk_size: usize,
    pub pipe_chunk_size: usize,
    /// Longest silence tolerated on a process pipe before the relay gives up.
    pub pipe_idle_timeout_secs: u64,
    /// Serve proxied streams without a direct URL from a live process pipe
    /// instead of download-then-relay.
    pub live_pipe: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("spotspof"),
            file_chunk_size: 8 * 1024,
            pipe_chunk_size: 4 * 1024,
            pipe_idle_timeout_secs: 60,
            live_pipe: false,
        }
    }
}

impl StreamConfig {
    pub fn pipe_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pipe_idle_timeout_secs)
    }
}

/// Playlist queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}
