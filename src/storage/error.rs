//! Errors raised by the persistence layer

use std::io;

use thiserror::Error;

use super::lock::LockError;
use super::remote::ClientError;
use crate::error::ErrorCategory;
use crate::script::CompileError;

/// Errors from the config, state, template and stats stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The run-lock is held by an in-progress run
    #[error("cannot modify {resource}: run is in progress")]
    Conflict { resource: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(CompileError),

    #[error("invalid JSON: {0}")]
    InvalidState(String),

    #[error("invalid {resource}: {reason}")]
    InvalidText {
        resource: &'static str,
        reason: String,
    },

    #[error("No stats available")]
    NoStats,

    #[error("failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to {operation}: {source}")]
    Json {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("remote store: {0}")]
    Remote(#[from] ClientError),
}

impl StoreError {
    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn json(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            operation: operation.into(),
            source,
        }
    }

    /// Classify for status mapping
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Lock(e) if e.is_busy() => ErrorCategory::Conflict,
            Self::InvalidConfig(_) | Self::InvalidState(_) | Self::InvalidText { .. } => {
                ErrorCategory::Validation
            }
            Self::NoStats => ErrorCategory::NotFound,
            Self::Remote(e) => e.category(),
            Self::Io { .. } | Self::Json { .. } | Self::Lock(_) => ErrorCategory::Storage,
        }
    }
}
