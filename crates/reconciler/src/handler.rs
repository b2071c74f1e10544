//! User callbacks driven by the reconciler.

use async_trait::async_trait;
use steward_core::{Declaration, Uid};

use crate::context::Context;
use crate::error::HandlerError;

/// Creates, updates and cleans up backing-store state for a declaration.
///
/// Both operations may be invoked more than once for the same state and must
/// be idempotent.
#[async_trait]
pub trait ReconcileHandler<D: Declaration>: Send + Sync {
    /// Make the backing store match the declaration.
    ///
    /// The declaration may be mutated in memory (typically its status); the
    /// reconciler derives the status write from the difference.
    async fn upsert(&self, ctx: &Context, declaration: &mut D) -> Result<(), HandlerError>;

    /// Remove everything the backing store holds for `uid`.
    async fn delete(&self, ctx: &Context, uid: &Uid) -> Result<(), HandlerError>;
}

/// Clears a pre-existing record that made an upsert fail with
/// [`HandlerError::Conflict`], so that the next upsert can succeed.
#[async_trait]
pub trait ConflictResolver<D: Declaration>: Send + Sync {
    async fn resolve_conflict(&self, ctx: &Context, declaration: &D) -> Result<(), HandlerError>;
}
