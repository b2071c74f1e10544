//! Requeue directives returned by a reconciliation pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::serde_secs;
use crate::error::Error;

/// What the delivery layer should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Nothing left to do; wait for the next change notification.
    Done,
    /// Re-invoke for the same identity no sooner than the given delay.
    After(Duration),
}

impl Requeue {
    /// Requeue with zero delay.
    pub const fn immediately() -> Self {
        Self::After(Duration::ZERO)
    }

    /// The requested delay, if any.
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::Done => None,
            Self::After(delay) => Some(*delay),
        }
    }

    /// Whether no requeue was requested.
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Delay class of a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBand {
    /// Conflict resolution itself failed; retry at once.
    Immediate,
    /// Conflict was resolved; give the removal time to propagate.
    Short,
    /// Transient backend failure; cool down first.
    Long,
}

/// Maps retry bands to concrete delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeuePolicy {
    /// Delay after a resolved conflict.
    #[serde(
        rename = "short_requeue_secs",
        with = "serde_secs",
        default = "default_short"
    )]
    pub short: Duration,
    /// Delay after any other failure.
    #[serde(
        rename = "long_requeue_secs",
        with = "serde_secs",
        default = "default_long"
    )]
    pub long: Duration,
}

const fn default_short() -> Duration {
    Duration::from_secs(5)
}

const fn default_long() -> Duration {
    Duration::from_secs(120)
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            short: default_short(),
            long: default_long(),
        }
    }
}

impl RequeuePolicy {
    /// Delay for the given band.
    pub const fn delay(&self, band: RetryBand) -> Duration {
        match band {
            RetryBand::Immediate => Duration::ZERO,
            RetryBand::Short => self.short,
            RetryBand::Long => self.long,
        }
    }
}

/// A failed pass: the error to surface plus the requeue to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileFailure {
    /// What went wrong.
    pub error: Error,
    /// Which delay class applies.
    pub band: RetryBand,
    /// Delay before the next attempt.
    pub requeue_after: Duration,
}

impl ReconcileFailure {
    /// Pair an error with the delay its band maps to under `policy`.
    pub fn new(error: Error, band: RetryBand, policy: &RequeuePolicy) -> Self {
        Self {
            error,
            band,
            requeue_after: policy.delay(band),
        }
    }

    /// The requeue directive carried by this failure.
    pub const fn requeue(&self) -> Requeue {
        Requeue::After(self.requeue_after)
    }
}

impl std::fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (requeue after {:?})", self.error, self.requeue_after)
    }
}

impl std::error::Error for ReconcileFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of a single reconciliation pass.
pub type ReconcileResult = std::result::Result<Requeue, ReconcileFailure>;
