//! Error types for blobkit-core
//!
//! Provides the one error type every backend reports through. Errors are
//! `Clone` so that a test double can hand out the same injected error on
//! every call.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for blobkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage backend operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input (bad part number, unsatisfiable range, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Blob or bucket not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conditional request did not match (If-Match, copy source ETag)
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Multipart upload handle is unknown, committed, aborted or expired
    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    /// Commit was attempted while required parts are missing
    #[error("Missing parts: {0}")]
    MissingParts(String),

    /// Network error (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Feature not supported by backend
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Test double invoked without a wrapped backend
    #[error("No backend configured for {0}")]
    NoBackend(&'static str),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// General error
    #[error("{0}")]
    General(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("TOML serialization error: {err}"))
    }
}

impl Error {
    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) | Error::InvalidUrl(_) => 2, // UsageError
            Error::Network(_) => 3,                                                   // NetworkError
            Error::Auth(_) => 4,                                                      // AuthError
            Error::NotFound(_) | Error::NoSuchUpload(_) => 5,                         // NotFound
            Error::Conflict(_) | Error::PreconditionFailed(_) | Error::MissingParts(_) => 6, // Conflict
            Error::UnsupportedFeature(_) | Error::NoBackend(_) => 7, // UnsupportedFeature
            _ => 1,                                                  // GeneralError
        }
    }

    /// Whether a caller may reasonably retry the operation
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Whether this error reports an out-of-sequence multipart call
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::NoSuchUpload(_) | Error::MissingParts(_))
    }
}
