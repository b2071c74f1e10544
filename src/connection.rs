//! `Connection` declarations reconciled into an in-memory connection table.
//!
//! The table enforces a unique connection name. A name can be left behind by
//! a declaration that was recreated under a new identity, which makes the
//! upsert conflict; the conflict resolver drops the stale row so the next
//! pass succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use steward_core::{Declaration, ObjectMeta, Uid};
use steward_reconciler::{
    ConflictResolver, Context, HandlerError, ReconcileHandler, Scheme, StatusReporting,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Finalizer claimed by the connection reconciler.
pub const CONNECTION_FINALIZER: &str = "connection.steward.dev";

/// Desired connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Unique connection name.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Optional login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Observed connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub ready: bool,
    pub observed_generation: u64,
}

/// A connection declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub meta: ObjectMeta,
    pub spec: ConnectionSpec,
    #[serde(default)]
    pub status: Option<ConnectionStatus>,
}

impl Connection {
    /// New connection declaration with a fresh identity.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            meta: ObjectMeta::new(name.clone()),
            spec: ConnectionSpec {
                name,
                url: url.into(),
                username: None,
            },
            status: None,
        }
    }

    /// Set the login.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.spec.username = Some(username.into());
        self
    }
}

impl Declaration for Connection {
    type Status = ConnectionStatus;
    const KIND: &'static str = "Connection";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn status(&self) -> Option<&ConnectionStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<ConnectionStatus> {
        &mut self.status
    }
}

/// Register the `Connection` kind. Its status supports merge patches.
///
/// # Errors
///
/// Returns an error if the kind is already registered.
pub fn register(scheme: &mut Scheme) -> steward_core::Result<()> {
    scheme.register::<Connection>(StatusReporting::merge_patch())?;
    Ok(())
}

/// A row in the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRow {
    pub id: Uid,
    pub name: String,
    pub url: String,
    pub username: Option<String>,
}

/// Connection table failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("connection name '{name}' is already used by {owner}")]
    UniqueViolation { name: String, owner: Uid },
}

impl From<TableError> for HandlerError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::UniqueViolation { .. } => Self::conflict(err.to_string()),
        }
    }
}

/// In-memory connection table keyed by declaration identity with a unique
/// name index.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    rows: RwLock<HashMap<Uid, ConnectionRow>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or update the row owned by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::UniqueViolation`] if another row holds the name.
    pub async fn upsert(&self, id: &Uid, spec: &ConnectionSpec) -> Result<(), TableError> {
        let mut rows = self.rows.write().await;
        if let Some(owner) = rows
            .values()
            .find(|row| row.name == spec.name && &row.id != id)
        {
            return Err(TableError::UniqueViolation {
                name: spec.name.clone(),
                owner: owner.id.clone(),
            });
        }
        rows.insert(
            id.clone(),
            ConnectionRow {
                id: id.clone(),
                name: spec.name.clone(),
                url: spec.url.clone(),
                username: spec.username.clone(),
            },
        );
        Ok(())
    }

    /// Remove the row owned by `id`. Returns whether a row was removed.
    pub async fn remove(&self, id: &Uid) -> bool {
        self.rows.write().await.remove(id).is_some()
    }

    /// Remove every row named `name` that `id` does not own.
    pub async fn evict_name(&self, name: &str, id: &Uid) -> usize {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row_id, row| row.name != name || row_id == id);
        before - rows.len()
    }

    /// Seed a row directly, bypassing reconciliation.
    pub async fn seed(&self, row: ConnectionRow) {
        self.rows.write().await.insert(row.id.clone(), row);
    }

    pub async fn get(&self, id: &Uid) -> Option<ConnectionRow> {
        self.rows.read().await.get(id).cloned()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<ConnectionRow> {
        self.rows
            .read()
            .await
            .values()
            .find(|row| row.name == name)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// All rows ordered by name.
    pub async fn rows(&self) -> Vec<ConnectionRow> {
        let mut rows: Vec<_> = self.rows.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}

/// Upserts and deletes connection rows.
pub struct ConnectionHandler {
    table: Arc<ConnectionTable>,
}

impl ConnectionHandler {
    pub const fn new(table: Arc<ConnectionTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ReconcileHandler<Connection> for ConnectionHandler {
    async fn upsert(&self, ctx: &Context, connection: &mut Connection) -> Result<(), HandlerError> {
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.table.upsert(connection.uid(), &connection.spec).await?;
        connection.status = Some(ConnectionStatus {
            ready: true,
            observed_generation: connection.meta.generation,
        });
        Ok(())
    }

    async fn delete(&self, ctx: &Context, uid: &Uid) -> Result<(), HandlerError> {
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        if !self.table.remove(uid).await {
            debug!(uid = %uid, "no connection row to delete");
        }
        Ok(())
    }
}

/// Drops stale rows that hold a connection's name.
pub struct ConnectionConflictResolver {
    table: Arc<ConnectionTable>,
}

impl ConnectionConflictResolver {
    pub const fn new(table: Arc<ConnectionTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ConflictResolver<Connection> for ConnectionConflictResolver {
    async fn resolve_conflict(
        &self,
        ctx: &Context,
        connection: &Connection,
    ) -> Result<(), HandlerError> {
        if ctx.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        let evicted = self
            .table
            .evict_name(&connection.spec.name, connection.uid())
            .await;
        if evicted == 0 {
            return Err(HandlerError::failed(format!(
                "no stale row holds connection name '{}'",
                connection.spec.name
            )));
        }
        info!(
            resource = %connection.resource_name(),
            evicted,
            "evicted stale connection rows"
        );
        Ok(())
    }
}
