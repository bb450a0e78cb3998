//! Unified error type for spotspof.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for HTTP handlers to derive a status code via [`Error::http_status`].

use std::fmt;

/// Why an extraction call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionReason {
    /// The track reference cannot be mapped to a URL.
    UnsupportedSource,
    /// The external tool could not find or describe the track.
    ResolutionFailed,
    /// The external tool did not finish within its time budget.
    Timeout,
    /// The external tool exited non-zero or produced unexpected output.
    ToolFailure,
}

impl ExtractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionReason::UnsupportedSource => "unsupported_source",
            ExtractionReason::ResolutionFailed => "resolution_failed",
            ExtractionReason::Timeout => "extraction_timeout",
            ExtractionReason::ToolFailure => "external_tool_failure",
        }
    }
}

impl fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type covering all failure modes in spotspof.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Resolving, downloading, or searching through the external tool failed.
    #[error("Extraction failed [{reason}]: {message}")]
    Extraction {
        /// Classification of the failure.
        reason: ExtractionReason,
        /// Underlying message (tool stderr, parse error, etc.).
        message: String,
    },

    /// Creating, reading, or deleting a temp artifact failed.
    #[error("Artifact IO error: {source}")]
    ArtifactIo {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The client went away mid-transfer. Triggers cleanup, never a response.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "queue entry").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The operation conflicts with current state (e.g. queue is full).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Extraction { reason, .. } => match reason {
                ExtractionReason::UnsupportedSource => 400,
                ExtractionReason::ResolutionFailed => 404,
                ExtractionReason::Timeout => 504,
                ExtractionReason::ToolFailure => 502,
            },
            Error::ArtifactIo { .. } => 500,
            Error::ClientDisconnected => 499,
            Error::Unauthorized(_) => 401,
            Error::Validation(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Extraction { reason, .. } => reason.as_str(),
            Error::ArtifactIo { .. } => "artifact_io_error",
            Error::ClientDisconnected => "client_disconnected",
            Error::Unauthorized(_) => "unauthorized",
            Error::Validation(_) => "validation_error",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Config(_) => "config_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::Extraction`].
    pub fn extraction(reason: ExtractionReason, message: impl Into<String>) -> Self {
        Error::Extraction {
            reason,
            message: message.into(),
        }
    }

    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::extraction(ExtractionReason::UnsupportedSource, message)
    }

    pub fn resolution_failed(message: impl Into<String>) -> Self {
        Self::extraction(ExtractionReason::ResolutionFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::extraction(ExtractionReason::Timeout, message)
    }

    /// An external tool failed. The tool name prefixes the message.
    pub fn tool_failure(tool: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::extraction(ExtractionReason::ToolFailure, format!("{tool}: {message}"))
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// The extraction reason, if this is an extraction error.
    pub fn extraction_reason(&self) -> Option<ExtractionReason> {
        match self {
            Error::Extraction { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
