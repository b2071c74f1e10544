//! Per-pass cancellation context.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Handed unchanged to every collaborator call made during one pass.
///
/// Collaborators are expected to fail fast once the context is cancelled;
/// the reconciler treats that like any other failure.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// A fresh, uncancelled context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token.
    pub const fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Whether the pass has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the pass is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Derive a context that is cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }
}
