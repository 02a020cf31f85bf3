//! Unified error handling for the feedwarden crate
//!
//! Each domain keeps its own error enum; this module folds them into a
//! single [`Error`] for code that crosses module boundaries (runs, CLI
//! commands), and classifies every error into an [`ErrorCategory`] that
//! decides how it is surfaced.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification used for status mapping
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust
//! use feedwarden::error::{Error, ErrorCategory};
//!
//! let err = Error::not_found("feed \"https://example.com\" not found");
//! assert_eq!(err.category(), ErrorCategory::NotFound);
//! assert_eq!(err.category().status_code(), 404);
//! ```

use std::io;
use thiserror::Error;

pub use crate::fetcher::notify::NotifyError;
pub use crate::fetcher::source::FetchError;
pub use crate::script::CompileError;
pub use crate::storage::lock::LockError;
pub use crate::storage::remote::ClientError;
pub use crate::storage::StoreError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected input (bad script, bad JSON, bad text)
    Validation,
    /// Operation refused because a run holds the run-lock
    Conflict,
    /// Requested resource does not exist
    NotFound,
    /// Storage and I/O errors
    Storage,
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// HTTP status used by the admin API for this category
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Storage | Self::Network | Self::Config | Self::Other => 500,
        }
    }
}

/// Unified error type for the feedwarden crate
#[derive(Error, Debug)]
pub enum Error {
    /// Config, state, template or stats storage errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Run-lock errors
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Config script errors
    #[error("invalid config: {0}")]
    Compile(#[from] CompileError),

    /// Feed fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Notification delivery errors
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Remote admin API errors
    #[error("Remote error: {0}")]
    Client(#[from] ClientError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing resource
    #[error("{0}")]
    NotFound(String),

    /// Anything else, carried as text
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Category for status mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Lock(e) if e.is_busy() => ErrorCategory::Conflict,
            Self::Lock(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Compile(_) => ErrorCategory::Validation,
            Self::Fetch(_) | Self::Notify(_) => ErrorCategory::Network,
            Self::Client(e) => e.category(),
            Self::Json(_) => ErrorCategory::Storage,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether the run-lock was held by someone else
    pub fn is_conflict(&self) -> bool {
        self.category() == ErrorCategory::Conflict
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_error_category() {
        let err = Error::from(StoreError::Conflict { resource: "config" });
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(err.is_conflict());

        let err = Error::from(CompileError::new(1, 1, "bad"));
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = Error::from(LockError::Busy {
            path: PathBuf::from(".run.lock"),
        });
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_network_errors() {
        assert_eq!(Error::from(FetchError::Timeout).category(), ErrorCategory::Network);
        assert_eq!(
            Error::from(NotifyError::InvalidConfig("x".into())).category().status_code(),
            500
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorCategory::Validation.status_code(), 400);
        assert_eq!(ErrorCategory::NotFound.status_code(), 404);
        assert_eq!(ErrorCategory::Conflict.status_code(), 409);
        assert_eq!(ErrorCategory::Storage.status_code(), 500);
        assert_eq!(ErrorCategory::Other.status_code(), 500);
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err = Error::from(StoreError::NoStats);
        assert_eq!(err.to_string(), "No stats available");
    }

    #[test]
    fn test_anyhow_error_keeps_context() {
        let err = Error::from(anyhow::anyhow!("disk full").context("saving state"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "saving state: disk full");
    }
}
