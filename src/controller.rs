//! Wiring for the connection controller: store, table, reconciler and loop.

use std::sync::Arc;
use std::time::Duration;

use steward_core::Uid;
use steward_reconciler::{
    DeclarationIndex, InMemoryStore, ReconcilerBuilder, ReconciliationLoop, Scheme,
    StewardConfig,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::connection::{
    self, Connection, ConnectionConflictResolver, ConnectionHandler, ConnectionTable,
};

/// Poll interval while waiting for the controller to settle.
const SETTLE_POLL: Duration = Duration::from_millis(20);

/// A running (or ready to run) connection controller.
pub struct ConnectionController {
    store: Arc<InMemoryStore<Connection>>,
    table: Arc<ConnectionTable>,
    work: Arc<ReconciliationLoop<Connection>>,
}

impl ConnectionController {
    /// Build the controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the kind cannot
    /// be registered.
    pub fn new(config: &StewardConfig) -> steward_reconciler::Result<Self> {
        let mut scheme = Scheme::new();
        connection::register(&mut scheme)?;

        let store = InMemoryStore::<Connection>::new_arc();
        let table = ConnectionTable::new_arc();
        let reconciler = ReconcilerBuilder::<Connection>::new()
            .with_store(store.clone())
            .with_handler(Arc::new(ConnectionHandler::new(table.clone())))
            .with_conflict_resolver(Arc::new(ConnectionConflictResolver::new(table.clone())))
            .with_config(config.reconciler.clone())
            .build(&scheme)?;

        config.work_loop.validate()?;
        let work = Arc::new(ReconciliationLoop::new(
            Arc::new(reconciler),
            config.work_loop.clone(),
        ));
        Ok(Self { store, table, work })
    }

    /// Declarations.
    pub fn store(&self) -> &Arc<InMemoryStore<Connection>> {
        &self.store
    }

    /// Backing table.
    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// Start watching the store and running workers.
    ///
    /// Identities already in the store are queued once.
    pub async fn start(&self) -> JoinHandle<()> {
        self.work.watch(self.store.subscribe(), self.store.clone());
        for uid in self.store.uids().await {
            self.work.enqueue(uid).await;
        }
        let work = Arc::clone(&self.work);
        let handle = tokio::spawn(async move { work.run().await });
        info!("connection controller started");
        handle
    }

    /// Ask the workers to stop.
    pub fn stop(&self) {
        self.work.stopper().stop();
    }

    /// Create or update a declaration.
    pub async fn apply(&self, connection: Connection) -> Uid {
        self.store.insert(connection).await
    }

    /// Request deletion of a declaration.
    pub async fn delete(&self, uid: &Uid) -> bool {
        self.store.mark_for_deletion(uid).await
    }

    /// Whether the queue is drained and every declaration reports a ready
    /// status for its current generation.
    pub async fn is_settled(&self) -> bool {
        if !self.work.queue().is_idle().await {
            return false;
        }
        self.store.list().await.iter().all(|connection| {
            !connection.meta.is_being_deleted()
                && connection.status.as_ref().is_some_and(|status| {
                    status.ready && status.observed_generation == connection.meta.generation
                })
        })
    }

    /// Wait until [`Self::is_settled`] holds. Returns `false` on timeout.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let settle = async {
            while !self.is_settled().await {
                tokio::time::sleep(SETTLE_POLL).await;
            }
        };
        tokio::time::timeout(timeout, settle).await.is_ok()
    }
}
