//! Work-queue driver for a reconciler.
//!
//! The reconciler only returns requeue directives; this module is the
//! delivery layer that honors them. It keeps one in-flight pass per
//! identity, coalesces duplicate triggers, and applies per-identity
//! exponential backoff on failed passes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steward_core::{Declaration, ResultExt, Uid};
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{serde_millis, serde_secs};
use crate::context::Context;
use crate::reconciler::Reconciler;
use crate::store::DeclarationIndex;
use crate::types::Requeue;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Backoff after the first consecutive failure of an identity.
    #[serde(
        rename = "backoff_base_ms",
        with = "serde_millis",
        default = "default_backoff_base"
    )]
    pub backoff_base: Duration,
    /// Upper bound for per-identity backoff.
    #[serde(
        rename = "backoff_cap_secs",
        with = "serde_secs",
        default = "default_backoff_cap"
    )]
    pub backoff_cap: Duration,
}

const fn default_workers() -> usize {
    2
}

const fn default_backoff_base() -> Duration {
    Duration::from_millis(5)
}

const fn default_backoff_cap() -> Duration {
    Duration::from_secs(1000)
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

impl LoopConfig {
    /// Check field constraints.
    ///
    /// # Errors
    ///
    /// Returns an invalid config error for zero workers or a cap below the base.
    pub fn validate(&self) -> steward_core::Result<()> {
        if self.workers == 0 {
            return Err(steward_core::Error::invalid_config(
                "loop needs at least one worker",
            ));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(steward_core::Error::invalid_config(
                "backoff cap must not be below backoff base",
            ));
        }
        Ok(())
    }

    /// Backoff for the given number of consecutive failures (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Uid>,
    dirty: HashSet<Uid>,
    processing: HashSet<Uid>,
    failures: HashMap<Uid, u32>,
    shutting_down: bool,
}

/// Deduplicating queue of identities with at most one in-flight pass each.
///
/// An identity added while it is being processed is parked and handed out
/// again once [`WorkQueue::done`] is called for it.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: LoopConfig,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new(config: LoopConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config,
        }
    }

    /// Enqueue an identity now.
    pub async fn add(&self, uid: Uid) {
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(uid.clone()) {
            return;
        }
        if state.processing.contains(&uid) {
            return;
        }
        state.queue.push_back(uid);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue an identity once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, uid: Uid, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(uid).await;
        });
    }

    /// Enqueue after the larger of `hint` and the identity's backoff, and
    /// count the failure.
    pub async fn add_rate_limited(self: &Arc<Self>, uid: Uid, hint: Duration) -> Duration {
        let failures = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(uid.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = hint.max(self.config.backoff(failures));
        self.add_after(uid, delay);
        delay
    }

    /// Reset the failure count of an identity.
    pub async fn forget(&self, uid: &Uid) {
        self.state.lock().await.failures.remove(uid);
    }

    /// Consecutive failures recorded for an identity.
    pub async fn failures(&self, uid: &Uid) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(uid)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next identity. Returns `None` once shut down.
    pub async fn get(&self) -> Option<Uid> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(uid) = state.queue.pop_front() {
                    state.dirty.remove(&uid);
                    state.processing.insert(uid.clone());
                    return Some(uid);
                }
            }
            notified.await;
        }
    }

    /// Mark a pass as finished, releasing any parked re-add.
    pub async fn done(&self, uid: &Uid) {
        let mut state = self.state.lock().await;
        state.processing.remove(uid);
        if state.dirty.contains(uid) {
            state.queue.push_back(uid.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out work and wake every waiting worker.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of identities waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether nothing is waiting.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    /// Whether nothing is waiting or in flight.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.queue.is_empty() && state.processing.is_empty()
    }
}

/// Handle to stop a running loop.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    token: CancellationToken,
}

impl LoopStopper {
    /// Request the loop to stop; in-flight passes see a cancelled context.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Drives a reconciler from a work queue.
pub struct ReconciliationLoop<D: Declaration> {
    reconciler: Arc<Reconciler<D>>,
    queue: Arc<WorkQueue>,
    config: LoopConfig,
    token: CancellationToken,
}

impl<D: Declaration> ReconciliationLoop<D> {
    /// Create a loop around a reconciler.
    pub fn new(reconciler: Arc<Reconciler<D>>, config: LoopConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new(config.clone())),
            config,
            token: CancellationToken::new(),
        }
    }

    /// The queue feeding the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// A handle that stops this loop.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            token: self.token.clone(),
        }
    }

    /// Trigger a pass for an identity.
    pub async fn enqueue(&self, uid: Uid) {
        self.queue.add(uid).await;
    }

    /// Forward change notifications into the queue until stopped.
    ///
    /// If notifications are dropped, every identity in `index` is queued
    /// again.
    pub fn watch(
        &self,
        mut changes: broadcast::Receiver<Uid>,
        index: Arc<dyn DeclarationIndex>,
    ) -> JoinHandle<()> {
        let queue = self.queue();
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(uid) => queue.add(uid).await,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            let uids = index.uids().await;
                            warn!(missed, resync = uids.len(), "change notifications lagged");
                            for uid in uids {
                                queue.add(uid).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Run the workers until the loop is stopped.
    pub async fn run(&self) {
        info!(
            kind = D::KIND,
            workers = self.config.workers,
            status_patch = self.reconciler.status_reporting().supports_patch(),
            resolves_conflicts = self.reconciler.resolves_conflicts(),
            "reconciliation loop starting"
        );
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = self.queue();
            let token = self.token.clone();
            workers.spawn(async move {
                while let Some(uid) = queue.get().await {
                    process(&reconciler, &queue, &token, uid).await;
                }
                debug!(worker, "worker stopped");
            });
        }

        self.token.cancelled().await;
        self.queue.shut_down().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "worker task failed");
            }
        }
        info!("reconciliation loop stopped");
    }
}

async fn process<D: Declaration>(
    reconciler: &Reconciler<D>,
    queue: &Arc<WorkQueue>,
    token: &CancellationToken,
    uid: Uid,
) {
    let ctx = Context::with_token(token.child_token());
    let outcome = reconciler
        .reconcile(&ctx, &uid)
        .await
        .tap_ok(|requeue| debug!(uid = %uid, requeue = ?requeue, "pass finished"))
        .tap_err(|failure| debug!(uid = %uid, band = ?failure.band, "pass failed"));

    match outcome {
        Ok(Requeue::Done) => queue.forget(&uid).await,
        Ok(Requeue::After(delay)) => {
            queue.forget(&uid).await;
            queue.add_after(uid.clone(), delay);
        }
        Err(failure) => {
            let delay = queue
                .add_rate_limited(uid.clone(), failure.requeue_after)
                .await;
            debug!(uid = %uid, delay = ?delay, "requeued with backoff");
        }
    }
    queue.done(&uid).await;
}
