//! Identity and lifecycle metadata carried by every declaration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;
use crate::result::Result;

/// Opaque, stable identifier of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh ULID-backed identifier.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A reconciler's claim on a declaration.
///
/// Always non-empty; see [`Finalizer::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Finalizer(String);

impl Finalizer {
    /// Validate and wrap a finalizer tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFinalizer`] if the tag is empty or only whitespace.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(Error::invalid_finalizer(tag, "finalizer cannot be empty"));
        }
        Ok(Self(tag))
    }

    /// Get the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Finalizer {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Finalizer> for String {
    fn from(value: Finalizer) -> Self {
        value.0
    }
}

impl std::fmt::Display for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle metadata of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Stable identity.
    pub uid: Uid,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Tombstone marker; set once the declaration is marked for removal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Tags that block physical removal until their owners clear them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,
    /// Bumped by the store on every spec write.
    #[serde(default)]
    pub generation: u64,
}

impl ObjectMeta {
    /// Metadata for a freshly created declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uid::generate(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether the tombstone marker is set.
    pub const fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present.
    pub fn has_finalizer(&self, finalizer: &Finalizer) -> bool {
        self.finalizers.contains(finalizer.as_str())
    }

    /// Add a finalizer. Returns `true` if the set changed.
    pub fn add_finalizer(&mut self, finalizer: &Finalizer) -> bool {
        self.finalizers.insert(finalizer.as_str().to_owned())
    }

    /// Remove a finalizer. Returns `true` if the set changed.
    pub fn remove_finalizer(&mut self, finalizer: &Finalizer) -> bool {
        self.finalizers.remove(finalizer.as_str())
    }
}
