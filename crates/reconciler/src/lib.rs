//! Finalizer-governed reconciliation loop.
//!
//! This crate drives a backing system toward the state described by typed
//! declarations, one pass per observed change:
//!
//! - **Lifecycle gate**: register the finalizer, proceed, or tear down
//! - **Dispatcher**: run upsert, route conflicts to a resolver, pick a retry band
//! - **Status**: patch or overwrite the status sub-record after a successful upsert
//! - **Requeue**: every pass returns `Done` or `After(delay)`; failures carry both
//!
//! # Key Concepts
//!
//! ## Finalizer ordering
//!
//! The finalizer is persisted before the first upsert and removed only after
//! the delete callback succeeds. The reconciler never removes a declaration
//! itself; clearing its finalizer lets the surrounding system do so.
//!
//! ## Retry bands
//!
//! - `Immediate` - the conflict resolver failed
//! - `Short` - a conflict was resolved; wait for the removal to propagate
//! - `Long` - any other failure
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use steward_reconciler::{
//!     Context, InMemoryStore, LoopConfig, ReconcilerBuilder, ReconcilerConfig,
//!     ReconciliationLoop, Scheme, StatusReporting,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scheme = Scheme::new();
//!     scheme.register::<Connection>(StatusReporting::merge_patch())?;
//!
//!     let store = InMemoryStore::<Connection>::new_arc();
//!     let reconciler = ReconcilerBuilder::<Connection>::new()
//!         .with_store(store.clone())
//!         .with_handler(Arc::new(ConnectionHandler::default()))
//!         .with_config(ReconcilerConfig::new("connections.steward.dev")?)
//!         .build(&scheme)?;
//!
//!     let work = ReconciliationLoop::new(Arc::new(reconciler), LoopConfig::default());
//!     work.watch(store.subscribe(), store.clone());
//!     // work.run().await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod r#loop;
pub mod reconciler;
pub mod scheme;
pub mod status;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{ReconcilerConfig, StewardConfig};
pub use context::Context;
pub use error::{Error, HandlerError, Result, StoreError};
pub use handler::{ConflictResolver, ReconcileHandler};
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop, WorkQueue};
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use scheme::{Registration, Scheme};
pub use status::{StatusPatch, StatusPatchFn, StatusReporting, StatusUpdate};
pub use store::{DeclarationIndex, DeclarationStore, InMemoryStore};
pub use types::{ReconcileFailure, ReconcileResult, Requeue, RequeuePolicy, RetryBand};
