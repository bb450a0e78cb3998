//! spotspof-extract: the media-resolution backend and the resources it hands out.
//!
//! - [`Extractor`]: resolve / download / live-stream / search contract, with
//!   [`YtDlpExtractor`] as the production implementation.
//! - [`ArtifactManager`] and [`TempArtifact`]: request-unique temp files with
//!   guaranteed cleanup.
//! - [`StreamSession`]: a running process whose stdout carries media bytes.
//! - [`ToolRegistry`]: discovery of yt-dlp and ffmpeg.

pub mod artifact;
pub mod command;
pub mod extractor;
pub mod session;
pub mod tools;
pub mod ytdlp;

pub use artifact::{ArtifactManager, TempArtifact};
pub use command::{ToolCommand, ToolOutput};
pub use extractor::{ExtractionResult, Extractor, SearchEntry};
pub use session::{SessionExit, StreamSession};
pub use tools::{ToolInfo, ToolRegistry, FFMPEG, YTDLP};
pub use ytdlp::YtDlpExtractor;
