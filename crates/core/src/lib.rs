//! Core types, errors, and declaration capabilities for Steward.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod declaration;
pub mod error;
pub mod meta;
pub mod result;

pub use declaration::Declaration;
pub use error::Error;
pub use meta::{Finalizer, ObjectMeta, Uid};
pub use result::{Result, ResultExt};
