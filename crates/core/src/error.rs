//! Core error types for Steward.
//!
//! These cover setup-time failures. Nothing here is raised mid-loop; errors
//! produced while reconciling live in `steward-reconciler`.

use thiserror::Error;

/// Core error type for Steward operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid finalizer '{tag}': {reason}")]
    InvalidFinalizer { tag: String, reason: String },

    // Registry errors
    #[error("declaration kind '{kind}' is not registered")]
    NotRegistered { kind: String },

    #[error("declaration kind '{kind}' is already registered")]
    AlreadyRegistered { kind: String },

    // Parsing errors
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid finalizer error.
    pub fn invalid_finalizer(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFinalizer {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Create a not registered error.
    pub fn not_registered(kind: impl Into<String>) -> Self {
        Self::NotRegistered { kind: kind.into() }
    }

    /// Create an already registered error.
    pub fn already_registered(kind: impl Into<String>) -> Self {
        Self::AlreadyRegistered { kind: kind.into() }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
