//! Configuration for the reconciler and its work-queue driver.
//!
//! Loaded from TOML:
//!
//! ```toml
//! [reconciler]
//! finalizer = "connections.steward.dev"
//! short_requeue_secs = 5
//! long_requeue_secs = 120
//!
//! [loop]
//! workers = 4
//! backoff_base_ms = 5
//! backoff_cap_secs = 1000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use steward_core::{Error, Finalizer, Result};

use crate::r#loop::LoopConfig;
use crate::types::RequeuePolicy;

/// Configuration for a single reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// This reconciler's claim on every declaration it has seen.
    pub finalizer: Finalizer,
    /// Delays per retry band.
    #[serde(flatten)]
    pub requeue: RequeuePolicy,
}

impl ReconcilerConfig {
    /// Config with the given finalizer and default delays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFinalizer`] if `finalizer` is empty.
    pub fn new(finalizer: impl Into<String>) -> Result<Self> {
        Ok(Self {
            finalizer: Finalizer::new(finalizer)?,
            requeue: RequeuePolicy::default(),
        })
    }

    /// Replace the requeue policy.
    #[must_use]
    pub fn with_requeue(mut self, requeue: RequeuePolicy) -> Self {
        self.requeue = requeue;
        self
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the short delay exceeds the long one.
    pub fn validate(&self) -> Result<()> {
        if self.requeue.short > self.requeue.long {
            return Err(Error::invalid_config(format!(
                "short requeue ({:?}) must not exceed long requeue ({:?})",
                self.requeue.short, self.requeue.long
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StewardConfig {
    pub reconciler: ReconcilerConfig,
    #[serde(rename = "loop", default)]
    pub work_loop: LoopConfig,
}

impl StewardConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on malformed TOML or failed validation.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.reconciler.validate()?;
        config.work_loop.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&input)
    }
}

/// Serde adapter for whole-second durations.
pub(crate) mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Serde adapter for millisecond durations.
pub(crate) mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
