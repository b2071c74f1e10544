#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Steward
//!
//! A connection controller built on the finalizer-governed reconciler.
//!
//! `Connection` declarations are reconciled into an in-memory table that
//! enforces unique connection names. Name clashes left behind by recreated
//! declarations are resolved by evicting the stale row.

pub mod cli;
pub mod connection;
pub mod controller;

// Re-export workspace crates
pub use steward_core;
pub use steward_reconciler;

pub use connection::{
    CONNECTION_FINALIZER, Connection, ConnectionConflictResolver, ConnectionHandler,
    ConnectionRow, ConnectionSpec, ConnectionStatus, ConnectionTable, TableError,
};
pub use controller::ConnectionController;
