//! Error types for sheetloader.
//!
//! Library crates use [`SheetloaderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Parse,
    Normalize,
    Write,
    Timeout,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Normalize => "normalize",
            Self::Write => "write",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for all sheetloader operations.
#[derive(Debug, thiserror::Error)]
pub enum SheetloaderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP failure (connect, TLS, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The remote API answered with a non-success status.
    #[error("remote API error: HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// The remote API asked us to slow down (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The source file could not be resolved or downloaded.
    #[error("fetch error: {message}")]
    Fetch { message: String },

    /// A format parser rejected the input.
    #[error("parse error ({format}): {message}")]
    Parse { format: String, message: String },

    /// The capture could not be reshaped into the canonical model.
    #[error("normalize error: {message}")]
    Normalize { message: String },

    /// A chunk write was rejected. `chunk` is the 1-based ordinal within the sheet.
    #[error("write error on sheet '{sheet}' chunk {chunk}/{chunks}: {message}")]
    Write {
        sheet: String,
        chunk: usize,
        chunks: usize,
        message: String,
    },

    /// A wall-clock bound was exceeded.
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// Illegal job lifecycle transition.
    #[error("job error: {message}")]
    Job { message: String },

    /// Local database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad argument, missing destination, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SheetloaderError>;

impl SheetloaderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error from any displayable message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }

    /// Create a parse error for the given format.
    pub fn parse(format: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Parse {
            format: format.into(),
            message: msg.into(),
        }
    }

    /// Create a normalize error from any displayable message.
    pub fn normalize(msg: impl Into<String>) -> Self {
        Self::Normalize {
            message: msg.into(),
        }
    }

    /// Create a job lifecycle error from any displayable message.
    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a remote call that produced this error is worth retrying.
    ///
    /// Rate limiting (429), server errors and transport failures are transient;
    /// everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
