//! Error types for the reconciler crate.

use steward_core::Uid;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a user callback (upsert, delete, conflict resolution).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The backing store already holds a record violating a uniqueness
    /// constraint. Only this variant routes to conflict resolution.
    #[error("uniqueness conflict: {reason}")]
    Conflict { reason: String },
    /// The per-pass context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// Any other backend failure.
    #[error("{reason}")]
    Failed { reason: String },
}

impl HandlerError {
    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a generic failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether this failure is a uniqueness conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Failure reported by a declaration store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The declaration does not exist (anymore).
    #[error("declaration '{uid}' not found")]
    NotFound { uid: Uid },
    /// The store could not complete the operation.
    #[error("store operation '{operation}' failed: {reason}")]
    Backend { operation: String, reason: String },
    /// The per-pass context was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(uid: Uid) -> Self {
        Self::NotFound { uid }
    }

    /// Create a backend error.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether the declaration was missing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Reconciler error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Fetching the declaration failed for a reason other than absence.
    #[error("failed to fetch '{uid}': {source}")]
    Fetch { uid: Uid, source: StoreError },
    /// The delete callback failed; the finalizer stays in place.
    #[error("failed to delete {resource}: {source}")]
    Delete {
        resource: String,
        source: HandlerError,
    },
    /// Adding or removing the finalizer could not be persisted.
    #[error("failed to update finalizers of {resource}: {source}")]
    Finalizer { resource: String, source: StoreError },
    /// The upsert callback failed.
    #[error("failed to upsert {resource}: {source}")]
    Upsert {
        resource: String,
        source: HandlerError,
    },
    /// The conflict resolver failed.
    #[error("failed to resolve conflict for {resource}: {source}")]
    ConflictResolution {
        resource: String,
        source: HandlerError,
    },
    /// The status patch could not be computed.
    #[error("failed to generate status patch for {resource}: {source}")]
    StatusPatch {
        resource: String,
        source: steward_core::Error,
    },
    /// The status write failed.
    #[error("failed to write status of {resource}: {source}")]
    Status { resource: String, source: StoreError },
    /// Setup-time error.
    #[error(transparent)]
    Core(#[from] steward_core::Error),
}

impl Error {
    /// Whether this error wraps an upsert uniqueness conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Upsert { source, .. } if source.is_conflict())
    }
}
