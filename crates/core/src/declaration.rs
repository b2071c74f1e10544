//! The capability set the reconciler operates against.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::meta::{ObjectMeta, Uid};

/// A desired-state record: anything that can report identity, tombstone
/// marker and finalizer tags, and that carries an optional status.
pub trait Declaration: Clone + Send + Sync + 'static {
    /// Status sub-record written back after a successful reconcile.
    type Status: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Type tag, used only in diagnostics.
    const KIND: &'static str;

    /// Lifecycle metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable lifecycle metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Current status, if any has been reported.
    fn status(&self) -> Option<&Self::Status>;

    /// Mutable status slot.
    fn status_mut(&mut self) -> &mut Option<Self::Status>;

    /// Identity shortcut.
    fn uid(&self) -> &Uid {
        &self.meta().uid
    }

    /// `Kind[uid]`, for log lines.
    fn resource_name(&self) -> String {
        format!("{}[{}]", Self::KIND, self.uid())
    }
}
