//! Error types for troupe-handlers.

use std::path::PathBuf;

use thiserror::Error;

/// All errors a built-in handler can report for a task.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A collection file that could not be parsed or serialized.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Absolute paths and `..` components are refused.
    #[error("path '{path}' escapes the project root")]
    PathEscapesRoot { path: PathBuf },

    #[error("{path} does not exist")]
    NotFound { path: PathBuf },

    #[error("no collection configured for content type '{content_type}'")]
    UnknownCollection { content_type: String },

    #[error("{path} does not hold a JSON array")]
    NotAnArray { path: PathBuf },

    #[error("cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Convenience constructor for [`HandlerError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> HandlerError {
    HandlerError::Io {
        path: path.into(),
        source,
    }
}
