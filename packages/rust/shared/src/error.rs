//! Error types for assetmirror.
//!
//! Library crates use [`MirrorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all assetmirror operations.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Logon failed or the logon reply carried no session token. Fatal for a run.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Network failure or non-2xx HTTP status.
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Malformed response document.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The remote service answered with an error reply.
    #[error("service error: {message}")]
    Service { message: String },

    /// A record is missing a field the traversal needs (id, display name, ...).
    #[error("malformed record: {message}")]
    MalformedRecord { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The run was cancelled (Ctrl-C or deadline).
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication {
            message: msg.into(),
        }
    }

    /// Create a transport error with no HTTP status (connection, timeout, body read).
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: msg.into(),
        }
    }

    /// Create a transport error for a non-success HTTP status.
    pub fn http_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a remote service error.
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service {
            message: msg.into(),
        }
    }

    /// Create a malformed-record error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord {
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

    /// Whether a retrieval that failed with this error may be retried through
    /// the fallback view.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Parse { .. } | Self::Service { .. }
        )
    }
}
