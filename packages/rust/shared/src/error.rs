//! Error types for AfriVerse.
//!
//! Library crates use [`AfriverseError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Whether a failed external call is worth retrying.
///
/// Transport failures (connect refused, timeout) are transient; application
/// failures (non-2xx status, undecodable body) will fail the same way again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transport,
    Application,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => f.write_str("transport"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// Top-level error type for all AfriVerse operations.
#[derive(Debug, thiserror::Error)]
pub enum AfriverseError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Content could not be fetched from the storage gateway.
    #[error("fetch error ({class}): {message}")]
    Fetch { class: ErrorClass, message: String },

    /// A transcription or reasoning engine failed.
    #[error("engine error ({class}): {message}")]
    Engine { class: ErrorClass, message: String },

    /// An atom failed validation and could not be repaired.
    #[error("syntax error: {atom:?} is not a well-formed atom")]
    Syntax { atom: String },

    /// The knowledge-base consistency check could not be completed.
    #[error("consistency check error: {0}")]
    ConsistencyCheck(String),

    /// A backend write-back failed after the stage's computation succeeded.
    #[error("backend update error ({class}): {message}")]
    BackendUpdate { class: ErrorClass, message: String },

    /// Any other backend call (symbolize, query, registry) failed.
    #[error("backend error ({class}): {message}")]
    Backend { class: ErrorClass, message: String },

    /// A job carried input the stage cannot work with.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A handler faulted (panicked or was cancelled) inside a worker.
    #[error("handler fault: {0}")]
    Handler(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AfriverseError>;

impl AfriverseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    pub fn fetch(class: ErrorClass, msg: impl Into<String>) -> Self {
        Self::Fetch {
            class,
            message: msg.into(),
        }
    }

    pub fn engine(class: ErrorClass, msg: impl Into<String>) -> Self {
        Self::Engine {
            class,
            message: msg.into(),
        }
    }

    pub fn backend(class: ErrorClass, msg: impl Into<String>) -> Self {
        Self::Backend {
            class,
            message: msg.into(),
        }
    }

    pub fn backend_update(class: ErrorClass, msg: impl Into<String>) -> Self {
        Self::BackendUpdate {
            class,
            message: msg.into(),
        }
    }

    /// The transport/application class, for errors raised by external calls.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Fetch { class, .. }
            | Self::Engine { class, .. }
            | Self::BackendUpdate { class, .. }
            | Self::Backend { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// True when the failure was at the transport level and a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == Some(ErrorClass::Transport)
    }
}
