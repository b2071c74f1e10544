//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides tap-style combinators so that an error can be logged on its way
//! through a pipeline without being swallowed.

use crate::error::Error;

/// The standard Result type for Steward core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Tap-style combinators for any Result type.
pub trait ResultExt<T, E> {
    /// Perform a side effect on the Ok value without consuming the Result.
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self;

    /// Perform a side effect on the Err value without consuming the Result.
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E> {
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self {
        if let Ok(ref v) = self {
            f(v);
        }
        self
    }

    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
