//! Reconciler implementation.
//!
//! One pass: fetch, lifecycle gate (register finalizer, proceed, or tear
//! down), dispatch the upsert outcome, report status, and hand back a
//! requeue directive. The reconciler keeps no state between passes.

use std::sync::Arc;

use steward_core::{Declaration, Uid};
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::context::Context;
use crate::error::{Error, HandlerError, Result, StoreError};
use crate::handler::{ConflictResolver, ReconcileHandler};
use crate::scheme::Scheme;
use crate::status::{StatusReporting, StatusUpdate};
use crate::store::DeclarationStore;
use crate::types::{ReconcileFailure, ReconcileResult, Requeue, RetryBand};

/// Finalizer-governed reconciler for one declaration type.
pub struct Reconciler<D: Declaration> {
    store: Arc<dyn DeclarationStore<D>>,
    handler: Arc<dyn ReconcileHandler<D>>,
    resolver: Option<Arc<dyn ConflictResolver<D>>>,
    status: StatusReporting<D>,
    config: ReconcilerConfig,
}

impl<D: Declaration> Reconciler<D> {
    /// Run one reconciliation pass for `uid`.
    ///
    /// # Errors
    ///
    /// Every failure comes back as a [`ReconcileFailure`] carrying the delay
    /// after which the pass should be retried. A missing declaration is not
    /// a failure.
    pub async fn reconcile(&self, ctx: &Context, uid: &Uid) -> ReconcileResult {
        let declaration = match self.store.fetch(ctx, uid).await {
            Ok(declaration) => declaration,
            Err(StoreError::NotFound { .. }) => {
                debug!(uid = %uid, "declaration not found, nothing to reconcile");
                return Ok(Requeue::Done);
            }
            Err(source) => {
                return Err(self.fail(
                    Error::Fetch {
                        uid: uid.clone(),
                        source,
                    },
                    RetryBand::Long,
                ));
            }
        };

        if declaration.meta().is_being_deleted() {
            return self.finalize(ctx, declaration).await;
        }

        let original = declaration.clone();
        let mut declaration = self.claim(ctx, declaration).await?;
        self.apply(ctx, &original, &mut declaration).await
    }

    /// Delete path: run cleanup, then release our finalizer.
    async fn finalize(&self, ctx: &Context, mut declaration: D) -> ReconcileResult {
        let resource = declaration.resource_name();
        info!(resource = %resource, "deleting");

        if let Err(source) = self.handler.delete(ctx, declaration.uid()).await {
            return Err(self.fail(Error::Delete { resource, source }, RetryBand::Long));
        }

        if declaration.meta_mut().remove_finalizer(&self.config.finalizer) {
            self.store.persist(ctx, &declaration).await.map_err(|source| {
                self.fail(
                    Error::Finalizer {
                        resource: resource.clone(),
                        source,
                    },
                    RetryBand::Long,
                )
            })?;
        }

        info!(resource = %resource, "deleted");
        Ok(Requeue::Done)
    }

    /// Make sure our finalizer is durably present before any upsert.
    async fn claim(
        &self,
        ctx: &Context,
        mut declaration: D,
    ) -> std::result::Result<D, ReconcileFailure> {
        if !declaration.meta_mut().add_finalizer(&self.config.finalizer) {
            return Ok(declaration);
        }

        let resource = declaration.resource_name();
        debug!(resource = %resource, finalizer = %self.config.finalizer, "adding finalizer");
        self.store
            .persist(ctx, &declaration)
            .await
            .map_err(|source| self.fail(Error::Finalizer { resource, source }, RetryBand::Long))?;
        Ok(declaration)
    }

    /// Upsert path: run the callback and route its outcome.
    async fn apply(&self, ctx: &Context, original: &D, declaration: &mut D) -> ReconcileResult {
        if let Err(source) = self.handler.upsert(ctx, declaration).await {
            return Err(self.dispatch_failure(ctx, declaration, source).await);
        }

        info!(resource = %declaration.resource_name(), "upserted");
        self.report_status(ctx, original, declaration).await?;
        Ok(Requeue::Done)
    }

    async fn dispatch_failure(
        &self,
        ctx: &Context,
        declaration: &D,
        source: HandlerError,
    ) -> ReconcileFailure {
        let resource = declaration.resource_name();
        let resolver = match &self.resolver {
            Some(resolver) if source.is_conflict() => resolver,
            _ => return self.fail(Error::Upsert { resource, source }, RetryBand::Long),
        };

        warn!(resource = %resource, error = %source, "upsert conflicted, resolving");
        match resolver.resolve_conflict(ctx, declaration).await {
            Ok(()) => self.fail(Error::Upsert { resource, source }, RetryBand::Short),
            Err(err) => self.fail(
                Error::ConflictResolution {
                    resource,
                    source: err,
                },
                RetryBand::Immediate,
            ),
        }
    }

    async fn report_status(
        &self,
        ctx: &Context,
        original: &D,
        current: &D,
    ) -> std::result::Result<(), ReconcileFailure> {
        let resource = current.resource_name();
        let update = match self.status {
            StatusReporting::Patch(generate) => match generate(original, current) {
                Ok(Some(patch)) if !patch.is_empty() => StatusUpdate::Patch(patch),
                Ok(_) => {
                    debug!(resource = %resource, "status unchanged, skipping write");
                    return Ok(());
                }
                Err(source) => {
                    let error = Error::StatusPatch { resource, source };
                    return Err(self.fail(error, RetryBand::Long));
                }
            },
            StatusReporting::FullOverwrite => StatusUpdate::Full(current.status().cloned()),
        };

        self.store
            .persist_status(ctx, current.uid(), update)
            .await
            .map_err(|source| self.fail(Error::Status { resource, source }, RetryBand::Long))
    }

    /// Log a failure and pair it with its requeue delay.
    fn fail(&self, error: Error, band: RetryBand) -> ReconcileFailure {
        let failure = ReconcileFailure::new(error, band, &self.config.requeue);
        error!(
            error = %failure.error,
            band = ?failure.band,
            requeue_after = ?failure.requeue_after,
            "reconcile failed"
        );
        failure
    }

    /// Configuration in effect.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Status reporting mode resolved at build time.
    pub const fn status_reporting(&self) -> StatusReporting<D> {
        self.status
    }

    /// Whether a conflict resolver is configured.
    pub const fn resolves_conflicts(&self) -> bool {
        self.resolver.is_some()
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder<D: Declaration> {
    store: Option<Arc<dyn DeclarationStore<D>>>,
    handler: Option<Arc<dyn ReconcileHandler<D>>>,
    resolver: Option<Arc<dyn ConflictResolver<D>>>,
    config: Option<ReconcilerConfig>,
}

impl<D: Declaration> ReconcilerBuilder<D> {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            store: None,
            handler: None,
            resolver: None,
            config: None,
        }
    }

    /// Set the declaration store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DeclarationStore<D>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the upsert/delete callbacks.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ReconcileHandler<D>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enable the conflict resolution path.
    #[must_use]
    pub fn with_conflict_resolver(mut self, resolver: Arc<dyn ConflictResolver<D>>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the reconciler, resolving the type's registration in `scheme`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the store, handler or config is
    /// missing, if the config is invalid, or if `D` is not registered.
    pub fn build(self, scheme: &Scheme) -> Result<Reconciler<D>> {
        let store = self
            .store
            .ok_or_else(|| steward_core::Error::invalid_config("declaration store is required"))?;
        let handler = self
            .handler
            .ok_or_else(|| steward_core::Error::invalid_config("reconcile handler is required"))?;
        let config = self
            .config
            .ok_or_else(|| steward_core::Error::invalid_config("finalizer is required"))?;
        config.validate()?;
        let registration = scheme.registration::<D>()?;

        debug!(
            kind = registration.kind(),
            status = ?registration.status(),
            finalizer = %config.finalizer,
            conflicts = self.resolver.is_some(),
            "reconciler built"
        );

        Ok(Reconciler {
            store,
            handler,
            resolver: self.resolver,
            status: registration.status(),
            config,
        })
    }
}

impl<D: Declaration> Default for ReconcilerBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}
