//! The work-queue driver converging declarations end to end.

mod common;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ScriptedResolver, Widget};
use steward_reconciler::{HandlerError, LoopConfig, ReconciliationLoop};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll = async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(CONVERGE_TIMEOUT, poll).await.is_ok()
}

fn start(h: &Harness) -> Arc<ReconciliationLoop<Widget>> {
    let work = Arc::new(ReconciliationLoop::new(
        Arc::clone(&h.reconciler),
        LoopConfig::default(),
    ));
    work.watch(h.store.subscribe(), h.store.clone());
    let runner = Arc::clone(&work);
    tokio::spawn(async move { runner.run().await });
    work
}

#[tokio::test]
async fn loop_converges_inserted_declarations() {
    let harness = Harness::builder().fast_requeue().build();
    let work = start(&harness);
    let h = &harness;

    let a = h.store.insert(Widget::new("a")).await;
    let b = h.store.insert(Widget::new("b")).await;
    let (a, b) = (&a, &b);

    let converged = eventually(move || async move {
        let records = h.handler.records.lock().await;
        records.contains_key(a) && records.contains_key(b)
    })
    .await;
    assert!(converged, "both widgets should reach the backing table");

    let queue = work.queue();
    let queue = &queue;
    assert!(eventually(move || async move { queue.is_idle().await }).await);

    work.stopper().stop();
}

#[tokio::test]
async fn loop_finalizes_deleted_declarations() {
    let harness = Harness::builder().fast_requeue().build();
    let work = start(&harness);
    let h = &harness;

    let uid = h.store.insert(Widget::new("temporary")).await;
    let uid = &uid;
    assert!(eventually(move || async move { h.has_finalizer(uid).await }).await);

    h.store.mark_for_deletion(uid).await;
    assert!(eventually(move || async move { !h.store.contains(uid).await }).await);
    assert!(h.handler.records.lock().await.is_empty());

    work.stopper().stop();
}

#[tokio::test]
async fn loop_retries_after_resolved_conflict() {
    let harness = Harness::builder()
        .fast_requeue()
        .resolver(ScriptedResolver::succeeding())
        .build();
    harness
        .handler
        .script_upsert(Err(HandlerError::conflict("name already taken")))
        .await;
    let work = start(&harness);
    let h = &harness;

    let uid = h.store.insert(Widget::new("contested")).await;
    let uid = &uid;

    let converged =
        eventually(move || async move { h.handler.records.lock().await.contains_key(uid) }).await;
    assert!(converged);
    assert!(h.handler.upsert_count() >= 2);

    work.stopper().stop();
}

#[tokio::test]
async fn loop_retries_transient_failures() {
    let harness = Harness::builder().fast_requeue().build();
    for _ in 0..2 {
        harness
            .handler
            .script_upsert(Err(HandlerError::failed("backend unavailable")))
            .await;
    }
    let work = start(&harness);
    let h = &harness;

    let uid = h.store.insert(Widget::new("persistent")).await;
    let uid = &uid;

    let converged =
        eventually(move || async move { h.handler.records.lock().await.contains_key(uid) }).await;
    assert!(converged);
    assert!(h.handler.upsert_count() >= 3);

    let queue = work.queue();
    let queue = &queue;
    assert!(eventually(move || async move { queue.failures(uid).await == 0 }).await);

    work.stopper().stop();
}

#[tokio::test]
async fn lagged_notifications_resync_every_identity() {
    let harness = Harness::builder().channel_capacity(1).build();
    let work = ReconciliationLoop::new(Arc::clone(&harness.reconciler), LoopConfig::default());
    let changes = harness.store.subscribe();

    // Fill the channel past capacity before the watcher reads anything.
    for name in ["a", "b", "c", "d"] {
        harness.store.insert(Widget::new(name)).await;
    }
    work.watch(changes, harness.store.clone());

    let queue = work.queue();
    let queue = &queue;
    assert!(eventually(move || async move { queue.len().await == 4 }).await);

    work.stopper().stop();
}

#[tokio::test]
async fn stopped_loop_returns() -> TestResult {
    let h = Harness::builder().build();
    let work = Arc::new(ReconciliationLoop::new(
        Arc::clone(&h.reconciler),
        LoopConfig::default(),
    ));
    let stopper = work.stopper();
    let runner = Arc::clone(&work);
    let handle = tokio::spawn(async move { runner.run().await });

    stopper.stop();
    tokio::time::timeout(CONVERGE_TIMEOUT, handle).await??;

    assert!(stopper.is_stopped());
    Ok(())
}
