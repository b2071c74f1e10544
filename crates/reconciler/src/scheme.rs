//! Explicit registry of declaration types.
//!
//! A `Scheme` is built by the caller and handed to the reconciler builder;
//! there is no process-wide registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use itertools::Itertools;
use steward_core::{Declaration, Error, Result};

use crate::status::StatusReporting;

/// Everything resolved about a declaration type at registration time.
pub struct Registration<D: Declaration> {
    kind: &'static str,
    status: StatusReporting<D>,
}

impl<D: Declaration> Clone for Registration<D> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            status: self.status,
        }
    }
}

impl<D: Declaration> std::fmt::Debug for Registration<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .finish()
    }
}

impl<D: Declaration> Registration<D> {
    /// Kind name of the registered type.
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Status reporting mode of the registered type.
    pub const fn status(&self) -> StatusReporting<D> {
        self.status
    }
}

/// Registry of declaration types known to a set of reconcilers.
#[derive(Default)]
pub struct Scheme {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    kinds: HashMap<&'static str, TypeId>,
}

impl Scheme {
    /// Create an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration type with its status reporting mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if the type, or another type
    /// with the same kind name, is already present.
    pub fn register<D: Declaration>(&mut self, status: StatusReporting<D>) -> Result<&mut Self> {
        let type_id = TypeId::of::<D>();
        if self.entries.contains_key(&type_id) || self.kinds.contains_key(D::KIND) {
            return Err(Error::already_registered(D::KIND));
        }
        self.kinds.insert(D::KIND, type_id);
        self.entries.insert(
            type_id,
            Box::new(Registration::<D> {
                kind: D::KIND,
                status,
            }),
        );
        Ok(self)
    }

    /// Look up the registration of a declaration type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if the type was never registered.
    pub fn registration<D: Declaration>(&self) -> Result<Registration<D>> {
        self.entries
            .get(&TypeId::of::<D>())
            .and_then(|entry| entry.downcast_ref::<Registration<D>>())
            .cloned()
            .ok_or_else(|| Error::not_registered(D::KIND))
    }

    /// Whether a declaration type is registered.
    pub fn contains<D: Declaration>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<D>())
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.kinds.keys().copied().sorted_unstable().collect()
    }
}

impl std::fmt::Debug for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheme").field("kinds", &self.kinds()).finish()
    }
}
