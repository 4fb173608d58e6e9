//! Exit code definitions for bk
//!
//! Scripts branch on these values; changing one is a breaking change.

use blobkit_core::Error;

/// Process exit codes
///
/// Each backend error kind maps to one code, so automation can tell a
/// retryable network failure from a missing blob or a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// General/unspecified error, including failed conformance checks
    GeneralError = 1,

    /// Invalid arguments or configuration
    UsageError = 2,

    /// Retryable network error: timeout, connection reset, 503, etc.
    NetworkError = 3,

    /// Authentication or permission failure
    AuthError = 4,

    /// Blob, bucket or multipart upload does not exist
    NotFound = 5,

    /// Conflict, failed precondition or missing multipart parts
    Conflict = 6,

    /// Backend does not support this operation or size
    UnsupportedFeature = 7,

    /// Operation was interrupted (e.g., Ctrl+C)
    Interrupted = 130,
}

impl ExitCode {
    /// Convert exit code to i32 for use with std::process::exit
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Create exit code from i32 value
    ///
    /// Returns None if the value doesn't correspond to a known exit code.
    pub const fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::GeneralError),
            2 => Some(Self::UsageError),
            3 => Some(Self::NetworkError),
            4 => Some(Self::AuthError),
            5 => Some(Self::NotFound),
            6 => Some(Self::Conflict),
            7 => Some(Self::UnsupportedFeature),
            130 => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// Exit code for a backend error
    pub const fn from_error(err: &Error) -> Self {
        match Self::from_i32(err.exit_code()) {
            Some(code) => code,
            None => Self::GeneralError,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "Operation completed successfully",
            Self::GeneralError => "General error",
            Self::UsageError => "Invalid arguments or configuration",
            Self::NetworkError => "Network error (retryable)",
            Self::AuthError => "Authentication or permission failure",
            Self::NotFound => "Resource not found",
            Self::Conflict => "Conflict or precondition failure",
            Self::UnsupportedFeature => "Not supported by backend",
            Self::Interrupted => "Operation interrupted",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        Self::from_error(err)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_roundtrip() {
        for code in [
            ExitCode::Success,
            ExitCode::GeneralError,
            ExitCode::UsageError,
            ExitCode::NetworkError,
            ExitCode::AuthError,
            ExitCode::NotFound,
            ExitCode::Conflict,
            ExitCode::UnsupportedFeature,
            ExitCode::Interrupted,
        ] {
            assert_eq!(ExitCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ExitCode::from_i32(99), None);
    }

    #[test]
    fn test_exit_code_from_backend_error() {
        assert_eq!(
            ExitCode::from_error(&Error::NotFound("k".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::NoSuchUpload("u".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from(&Error::MissingParts("p".into())),
            ExitCode::Conflict
        );
        assert_eq!(
            ExitCode::from(&Error::Network("reset".into())),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from(&Error::NoBackend("head_blob")),
            ExitCode::UnsupportedFeature
        );
        assert_eq!(
            ExitCode::from(&Error::General("x".into())),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_exit_code_display() {
        let display = format!("{}", ExitCode::NotFound);
        assert!(display.contains("5"));
        assert!(display.contains("not found"));
    }
}
