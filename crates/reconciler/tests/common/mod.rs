//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::{Declaration, Finalizer, ObjectMeta, Uid};
use steward_reconciler::{
    ConflictResolver, Context, DeclarationStore, HandlerError, InMemoryStore, ReconcileHandler,
    Reconciler, ReconcilerBuilder, ReconcilerConfig, RequeuePolicy, Scheme, StatusReporting,
    StatusUpdate, StoreError,
};
use tokio::sync::Mutex;

pub const FINALIZER: &str = "widgets.steward.dev";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetStatus {
    pub phase: String,
    pub observed_generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub meta: ObjectMeta,
    pub spec: WidgetSpec,
    pub status: Option<WidgetStatus>,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec: WidgetSpec {
                name: name.to_owned(),
            },
            status: None,
        }
    }
}

impl Declaration for Widget {
    type Status = WidgetStatus;
    const KIND: &'static str = "Widget";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn status(&self) -> Option<&WidgetStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<WidgetStatus> {
        &mut self.status
    }
}

pub fn finalizer() -> Finalizer {
    match Finalizer::new(FINALIZER) {
        Ok(finalizer) => finalizer,
        Err(e) => panic!("fixture finalizer is valid: {e}"),
    }
}

/// Backing "table" plus scripted callback outcomes.
pub struct ScriptedHandler {
    store: Arc<InMemoryStore<Widget>>,
    pub records: Mutex<HashMap<Uid, String>>,
    upsert_script: Mutex<VecDeque<Result<(), HandlerError>>>,
    delete_script: Mutex<VecDeque<Result<(), HandlerError>>>,
    pub upserts: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Set when an upsert ran while the stored declaration lacked the finalizer.
    pub unguarded_upsert: AtomicBool,
    /// Whether upsert reports a `Ready` status.
    pub report_ready: bool,
}

impl ScriptedHandler {
    pub fn new(store: Arc<InMemoryStore<Widget>>) -> Self {
        Self {
            store,
            records: Mutex::new(HashMap::new()),
            upsert_script: Mutex::new(VecDeque::new()),
            delete_script: Mutex::new(VecDeque::new()),
            upserts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            unguarded_upsert: AtomicBool::new(false),
            report_ready: true,
        }
    }

    pub fn without_status(mut self) -> Self {
        self.report_ready = false;
        self
    }

    pub async fn script_upsert(&self, outcome: Result<(), HandlerError>) {
        self.upsert_script.lock().await.push_back(outcome);
    }

    pub async fn script_delete(&self, outcome: Result<(), HandlerError>) {
        self.delete_script.lock().await.push_back(outcome);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReconcileHandler<Widget> for ScriptedHandler {
    async fn upsert(&self, ctx: &Context, widget: &mut Widget) -> Result<(), HandlerError> {
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let guarded = self
            .store
            .get(widget.uid())
            .await
            .is_some_and(|stored| stored.meta.has_finalizer(&finalizer()));
        if !guarded {
            self.unguarded_upsert.store(true, Ordering::SeqCst);
        }

        if let Some(outcome) = self.upsert_script.lock().await.pop_front() {
            outcome?;
        }
        self.records
            .lock()
            .await
            .insert(widget.uid().clone(), widget.spec.name.clone());
        if self.report_ready {
            widget.status = Some(WidgetStatus {
                phase: "Ready".to_owned(),
                observed_generation: widget.meta.generation,
            });
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Context, uid: &Uid) -> Result<(), HandlerError> {
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.delete_script.lock().await.pop_front() {
            outcome?;
        }
        self.records.lock().await.remove(uid);
        Ok(())
    }
}

/// Conflict resolver with a scripted outcome.
pub struct ScriptedResolver {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl ScriptedResolver {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl ConflictResolver<Widget> for ScriptedResolver {
    async fn resolve_conflict(&self, _ctx: &Context, _widget: &Widget) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HandlerError::failed("stale record is locked"));
        }
        Ok(())
    }
}

/// Store wrapper that can be told to fail individual operations.
pub struct FaultyStore {
    pub inner: Arc<InMemoryStore<Widget>>,
    pub fail_fetch: AtomicBool,
    pub fail_persist: AtomicBool,
    pub fail_status: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore<Widget>>) -> Self {
        Self {
            inner,
            fail_fetch: AtomicBool::new(false),
            fail_persist: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeclarationStore<Widget> for FaultyStore {
    async fn fetch(&self, ctx: &Context, uid: &Uid) -> Result<Widget, StoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::backend("fetch", "connection refused"));
        }
        self.inner.fetch(ctx, uid).await
    }

    async fn persist(&self, ctx: &Context, widget: &Widget) -> Result<(), StoreError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StoreError::backend("persist", "conflict on resourceVersion"));
        }
        self.inner.persist(ctx, widget).await
    }

    async fn persist_status(
        &self,
        ctx: &Context,
        uid: &Uid,
        update: StatusUpdate<WidgetStatus>,
    ) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(StoreError::backend("persist_status", "timeout"));
        }
        self.inner.persist_status(ctx, uid, update).await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore<Widget>>,
    pub faulty: Arc<FaultyStore>,
    pub handler: Arc<ScriptedHandler>,
    pub resolver: Option<Arc<ScriptedResolver>>,
    pub reconciler: Arc<Reconciler<Widget>>,
}

pub struct HarnessBuilder {
    status: StatusReporting<Widget>,
    resolver: Option<Arc<ScriptedResolver>>,
    report_ready: bool,
    requeue: RequeuePolicy,
    channel_capacity: Option<usize>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            status: StatusReporting::merge_patch(),
            resolver: None,
            report_ready: true,
            requeue: RequeuePolicy::default(),
            channel_capacity: None,
        }
    }
}

impl HarnessBuilder {
    pub fn full_overwrite(mut self) -> Self {
        self.status = StatusReporting::FullOverwrite;
        self
    }

    pub fn resolver(mut self, resolver: ScriptedResolver) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn without_status(mut self) -> Self {
        self.report_ready = false;
        self
    }

    pub fn fast_requeue(mut self) -> Self {
        self.requeue = RequeuePolicy {
            short: Duration::from_millis(10),
            long: Duration::from_millis(50),
        };
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(match self.channel_capacity {
            Some(capacity) => InMemoryStore::<Widget>::with_capacity(capacity),
            None => InMemoryStore::<Widget>::new(),
        });
        let faulty = Arc::new(FaultyStore::new(store.clone()));
        let mut handler = ScriptedHandler::new(store.clone());
        if !self.report_ready {
            handler = handler.without_status();
        }
        let handler = Arc::new(handler);

        let mut scheme = Scheme::new();
        if let Err(e) = scheme.register::<Widget>(self.status) {
            panic!("registration failed: {e}");
        }

        let config = match ReconcilerConfig::new(FINALIZER) {
            Ok(config) => config.with_requeue(self.requeue),
            Err(e) => panic!("config failed: {e}"),
        };
        let mut builder = ReconcilerBuilder::<Widget>::new()
            .with_store(faulty.clone())
            .with_handler(handler.clone())
            .with_config(config);
        if let Some(resolver) = &self.resolver {
            builder = builder.with_conflict_resolver(resolver.clone());
        }
        let reconciler = match builder.build(&scheme) {
            Ok(reconciler) => Arc::new(reconciler),
            Err(e) => panic!("reconciler build failed: {e}"),
        };

        Harness {
            store,
            faulty,
            handler,
            resolver: self.resolver,
            reconciler,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub async fn stored(&self, uid: &Uid) -> Widget {
        match self.store.get(uid).await {
            Some(widget) => widget,
            None => panic!("widget {uid} should exist"),
        }
    }

    pub async fn has_finalizer(&self, uid: &Uid) -> bool {
        self.store
            .get(uid)
            .await
            .is_some_and(|w| w.meta.has_finalizer(&finalizer()))
    }

    /// Insert a widget and run one pass so that it carries the finalizer.
    pub async fn admitted(&self, name: &str) -> Uid {
        let uid = self.store.insert(Widget::new(name)).await;
        if let Err(failure) = self.reconciler.reconcile(&Context::new(), &uid).await {
            panic!("admission pass failed: {failure}");
        }
        uid
    }
}
