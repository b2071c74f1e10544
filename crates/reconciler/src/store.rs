//! Declaration store trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use steward_core::{Declaration, Uid};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::context::Context;
use crate::error::StoreError;
use crate::status::{StatusUpdate, apply_merge_patch};

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Access to the desired-state records.
#[async_trait]
pub trait DeclarationStore<D: Declaration>: Send + Sync {
    /// Fetch the current declaration.
    async fn fetch(&self, ctx: &Context, uid: &Uid) -> Result<D, StoreError>;

    /// Write back the finalizer set of a modified declaration.
    ///
    /// Other fields of `declaration` may be stale and are not written.
    async fn persist(&self, ctx: &Context, declaration: &D) -> Result<(), StoreError>;

    /// Write the status sub-record.
    async fn persist_status(
        &self,
        ctx: &Context,
        uid: &Uid,
        update: StatusUpdate<D::Status>,
    ) -> Result<(), StoreError>;
}

/// Lists the identities a store currently holds.
///
/// Used to resync after change notifications were lost.
#[async_trait]
pub trait DeclarationIndex: Send + Sync {
    async fn uids(&self) -> Vec<Uid>;
}

/// In-memory declaration store.
///
/// Plays the surrounding system's part too: a tombstoned declaration whose
/// finalizers are all cleared is removed, and every effective change is
/// announced on a broadcast channel. Writes that change nothing stay silent.
pub struct InMemoryStore<D: Declaration> {
    declarations: RwLock<HashMap<Uid, D>>,
    changes: broadcast::Sender<Uid>,
    persists: AtomicUsize,
    status_writes: AtomicUsize,
}

impl<D: Declaration> Default for InMemoryStore<D> {
    fn default() -> Self {
        Self::with_capacity(CHANGE_CHANNEL_CAPACITY)
    }
}

impl<D: Declaration> InMemoryStore<D> {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose change channel holds `capacity` notifications
    /// per subscriber before the oldest are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            declarations: RwLock::new(HashMap::new()),
            changes,
            persists: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
        }
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Uid> {
        self.changes.subscribe()
    }

    /// Create or replace a declaration, as a user would.
    ///
    /// The stored generation is bumped; lifecycle fields owned by the store
    /// (tombstone, finalizers) are kept from the stored copy.
    pub async fn insert(&self, mut declaration: D) -> Uid {
        let uid = declaration.uid().clone();
        {
            let mut declarations = self.declarations.write().await;
            if let Some(existing) = declarations.get(&uid) {
                let meta = existing.meta();
                let deletion_timestamp = meta.deletion_timestamp;
                let finalizers = meta.finalizers.clone();
                let generation = meta.generation.saturating_add(1);
                let status = existing.status().cloned();
                let target = declaration.meta_mut();
                target.deletion_timestamp = deletion_timestamp;
                target.finalizers = finalizers;
                target.generation = generation;
                *declaration.status_mut() = status;
            }
            declarations.insert(uid.clone(), declaration);
        }
        self.notify(&uid);
        uid
    }

    /// Set the tombstone marker, as a user delete request would.
    ///
    /// Returns `false` if the declaration does not exist.
    pub async fn mark_for_deletion(&self, uid: &Uid) -> bool {
        let found = {
            let mut declarations = self.declarations.write().await;
            match declarations.get_mut(uid) {
                Some(declaration) => {
                    let meta = declaration.meta_mut();
                    if meta.deletion_timestamp.is_none() {
                        meta.deletion_timestamp = Some(Utc::now());
                    }
                    Self::collect_if_released(&mut declarations, uid);
                    true
                }
                None => false,
            }
        };
        if found {
            self.notify(uid);
        }
        found
    }

    /// Current copy of a declaration.
    pub async fn get(&self, uid: &Uid) -> Option<D> {
        self.declarations.read().await.get(uid).cloned()
    }

    /// Copies of every stored declaration.
    pub async fn list(&self) -> Vec<D> {
        self.declarations.read().await.values().cloned().collect()
    }

    /// Whether a declaration exists.
    pub async fn contains(&self, uid: &Uid) -> bool {
        self.declarations.read().await.contains_key(uid)
    }

    /// Number of stored declarations.
    pub async fn len(&self) -> usize {
        self.declarations.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.declarations.read().await.is_empty()
    }

    /// Number of `persist` calls that reached the store.
    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    /// Number of `persist_status` calls that reached the store.
    pub fn status_write_count(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn notify(&self, uid: &Uid) {
        // No subscribers is fine.
        let _ = self.changes.send(uid.clone());
    }

    fn collect_if_released(declarations: &mut HashMap<Uid, D>, uid: &Uid) {
        let released = declarations
            .get(uid)
            .is_some_and(|d| d.meta().is_being_deleted() && d.meta().finalizers.is_empty());
        if released {
            declarations.remove(uid);
            debug!(uid = %uid, "declaration removed");
        }
    }

    fn check(ctx: &Context) -> Result<(), StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl<D: Declaration> DeclarationIndex for InMemoryStore<D> {
    async fn uids(&self) -> Vec<Uid> {
        self.declarations.read().await.keys().cloned().collect()
    }
}

fn status_value<S: serde::Serialize>(
    status: Option<&S>,
    operation: &str,
) -> Result<Value, StoreError> {
    serde_json::to_value(status).map_err(|e| StoreError::backend(operation, e.to_string()))
}

#[async_trait]
impl<D: Declaration> DeclarationStore<D> for InMemoryStore<D> {
    async fn fetch(&self, ctx: &Context, uid: &Uid) -> Result<D, StoreError> {
        Self::check(ctx)?;
        self.get(uid)
            .await
            .ok_or_else(|| StoreError::not_found(uid.clone()))
    }

    async fn persist(&self, ctx: &Context, declaration: &D) -> Result<(), StoreError> {
        Self::check(ctx)?;
        self.persists.fetch_add(1, Ordering::SeqCst);
        let uid = declaration.uid().clone();
        let changed = {
            let mut declarations = self.declarations.write().await;
            let stored = declarations
                .get_mut(&uid)
                .ok_or_else(|| StoreError::not_found(uid.clone()))?;

            // Only the finalizer set is taken from the caller's copy.
            let finalizers = &declaration.meta().finalizers;
            let changed = &stored.meta().finalizers != finalizers;
            if changed {
                stored.meta_mut().finalizers.clone_from(finalizers);
            }
            Self::collect_if_released(&mut declarations, &uid);
            changed
        };
        if changed {
            self.notify(&uid);
        }
        Ok(())
    }

    async fn persist_status(
        &self,
        ctx: &Context,
        uid: &Uid,
        update: StatusUpdate<D::Status>,
    ) -> Result<(), StoreError> {
        Self::check(ctx)?;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let changed = {
            let mut declarations = self.declarations.write().await;
            let stored = declarations
                .get_mut(uid)
                .ok_or_else(|| StoreError::not_found(uid.clone()))?;

            let before = status_value(stored.status(), "persist_status")?;
            let after = match update {
                StatusUpdate::Patch(patch) => {
                    let mut merged = before.clone();
                    apply_merge_patch(&mut merged, patch.as_value());
                    merged
                }
                StatusUpdate::Full(status) => status_value(status.as_ref(), "persist_status")?,
            };
            if before == after {
                false
            } else {
                let status = serde_json::from_value::<Option<D::Status>>(after)
                    .map_err(|e| StoreError::backend("persist_status", e.to_string()))?;
                *stored.status_mut() = status;
                true
            }
        };
        if changed {
            self.notify(uid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use steward_core::{Finalizer, ObjectMeta};

    use super::*;
    use crate::status::StatusPatch;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        meta: ObjectMeta,
        status: Option<GadgetStatus>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GadgetStatus {
        phase: String,
    }

    impl Declaration for Gadget {
        type Status = GadgetStatus;
        const KIND: &'static str = "Gadget";

        fn meta(&self) -> &ObjectMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.meta
        }

        fn status(&self) -> Option<&GadgetStatus> {
            self.status.as_ref()
        }

        fn status_mut(&mut self) -> &mut Option<GadgetStatus> {
            &mut self.status
        }
    }

    fn gadget() -> Gadget {
        Gadget {
            meta: ObjectMeta::new("gadget"),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = InMemoryStore::<Gadget>::new();
        let result = store.fetch(&Context::new(), &Uid::new("nope")).await;
        assert!(result.is_err_and(|e| e.is_not_found()));
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let store = InMemoryStore::<Gadget>::new();
        let uid = store.insert(gadget()).await;
        let ctx = Context::new();
        ctx.cancel();
        assert_eq!(store.fetch(&ctx, &uid).await, Err(StoreError::Cancelled));
    }

    #[tokio::test]
    async fn test_released_tombstone_is_removed() -> Result<(), Box<dyn std::error::Error>> {
        let store = InMemoryStore::<Gadget>::new();
        let finalizer = Finalizer::new("gadgets.steward.dev")?;
        let mut declaration = gadget();
        declaration.meta.add_finalizer(&finalizer);
        let uid = store.insert(declaration).await;

        assert!(store.mark_for_deletion(&uid).await);
        assert!(store.contains(&uid).await);

        let mut fetched = store.fetch(&Context::new(), &uid).await?;
        fetched.meta.remove_finalizer(&finalizer);
        store.persist(&Context::new(), &fetched).await?;
        assert!(!store.contains(&uid).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_unguarded_delete_removes_immediately() {
        let store = InMemoryStore::<Gadget>::new();
        let uid = store.insert(gadget()).await;
        assert!(store.mark_for_deletion(&uid).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_patch_applies() -> Result<(), StoreError> {
        let store = InMemoryStore::<Gadget>::new();
        let uid = store.insert(gadget()).await;
        let patch = StatusPatch::new(json!({"phase": "Ready"}));
        store
            .persist_status(&Context::new(), &uid, StatusUpdate::Patch(patch))
            .await?;
        let stored = store.get(&uid).await.and_then(|p| p.status);
        assert_eq!(
            stored,
            Some(GadgetStatus {
                phase: "Ready".to_owned()
            })
        );
        assert_eq!(store.status_write_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_writes_are_silent() -> Result<(), StoreError> {
        let store = InMemoryStore::<Gadget>::new();
        let uid = store.insert(gadget()).await;
        let mut changes = store.subscribe();

        let fetched = store.fetch(&Context::new(), &uid).await?;
        store.persist(&Context::new(), &fetched).await?;
        store
            .persist_status(&Context::new(), &uid, StatusUpdate::Full(None))
            .await?;

        assert!(changes.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_keeps_concurrent_spec_edit() -> Result<(), Box<dyn std::error::Error>> {
        let store = InMemoryStore::<Gadget>::new();
        let uid = store.insert(gadget()).await;
        let ctx = Context::new();

        let mut fetched = store.fetch(&ctx, &uid).await?;
        let mut edited = fetched.clone();
        edited.meta.name = "edited".to_owned();
        store.insert(edited).await;

        fetched
            .meta
            .add_finalizer(&Finalizer::new("gadgets.steward.dev")?);
        store.persist(&ctx, &fetched).await?;

        let stored = store.get(&uid).await.ok_or("gadget missing")?;
        assert_eq!(stored.meta.name, "edited");
        assert_eq!(stored.meta.generation, fetched.meta.generation + 1);
        assert!(stored.meta.finalizers.contains("gadgets.steward.dev"));
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_cannot_clear_tombstone() -> Result<(), StoreError> {
        let store = InMemoryStore::<Gadget>::new();
        let mut declaration = gadget();
        declaration.meta.finalizers.insert("keep".to_owned());
        let uid = store.insert(declaration).await;
        store.mark_for_deletion(&uid).await;

        let mut fetched = store.fetch(&Context::new(), &uid).await?;
        fetched.meta.deletion_timestamp = None;
        store.persist(&Context::new(), &fetched).await?;

        let stored = store.get(&uid).await;
        assert!(stored.is_some_and(|p| p.meta.is_being_deleted()));
        Ok(())
    }
}
