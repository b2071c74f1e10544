//! Status reporting: patch generation and the full-overwrite fallback.
//!
//! A declaration type opts into patch-based reporting when it is registered.
//! Patches are RFC 7386 JSON merge patches computed by diffing the status
//! captured at fetch time against the status after a successful upsert.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use steward_core::Declaration;

/// Computes a status patch from the fetched snapshot and the current state.
///
/// `Ok(None)` means nothing changed and no status write happens.
pub type StatusPatchFn<D> =
    fn(previous: &D, current: &D) -> steward_core::Result<Option<StatusPatch>>;

/// How a declaration type reports its status, resolved once at registration.
pub enum StatusReporting<D: Declaration> {
    /// Write a computed patch, skipping the write when it is empty.
    Patch(StatusPatchFn<D>),
    /// Overwrite the whole status after every successful upsert.
    ///
    /// Kept for older declaration types; new types should use `Patch`.
    FullOverwrite,
}

impl<D: Declaration> Clone for StatusReporting<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Declaration> Copy for StatusReporting<D> {}

impl<D: Declaration> std::fmt::Debug for StatusReporting<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patch(_) => f.write_str("Patch"),
            Self::FullOverwrite => f.write_str("FullOverwrite"),
        }
    }
}

impl<D: Declaration> StatusReporting<D> {
    /// Patch reporting backed by a JSON merge-patch diff of the statuses.
    pub fn merge_patch() -> Self {
        Self::Patch(diff_statuses::<D>)
    }

    /// Whether the type reports status through patches.
    pub const fn supports_patch(&self) -> bool {
        matches!(self, Self::Patch(_))
    }
}

/// Default patch generator: diff the serialized statuses.
///
/// # Errors
///
/// Returns a serialization error if either status fails to serialize.
pub fn diff_statuses<D: Declaration>(
    previous: &D,
    current: &D,
) -> steward_core::Result<Option<StatusPatch>> {
    StatusPatch::diff(previous.status(), current.status())
}

/// A JSON merge patch against a status sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPatch {
    value: Value,
    /// The base was absent or not an object, so even `{}` takes effect.
    replaces: bool,
}

impl StatusPatch {
    /// Wrap a raw merge patch against an existing status object.
    pub const fn new(value: Value) -> Self {
        Self {
            value,
            replaces: false,
        }
    }

    /// Compute the merge patch turning `previous` into `current`.
    ///
    /// Returns `None` when the two serialize identically.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if either side fails to serialize.
    pub fn diff<S: Serialize>(
        previous: Option<&S>,
        current: Option<&S>,
    ) -> steward_core::Result<Option<Self>> {
        let previous = serde_json::to_value(previous)?;
        let current = serde_json::to_value(current)?;
        if previous == current {
            return Ok(None);
        }
        Ok(Some(Self {
            value: merge_patch_diff(&previous, &current),
            replaces: !previous.is_object(),
        }))
    }

    /// A patch with no effect: `{}` against an existing status object.
    pub fn is_empty(&self) -> bool {
        !self.replaces && self.value.as_object().is_some_and(Map::is_empty)
    }

    /// Borrow the raw patch.
    pub const fn as_value(&self) -> &Value {
        &self.value
    }

    /// Take the raw patch.
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Serialize for StatusPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

/// What a status write carries.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate<S> {
    /// Partial update.
    Patch(StatusPatch),
    /// Full overwrite with the in-memory status.
    Full(Option<S>),
}

/// Merge patch that turns `previous` into `current`.
///
/// Equal inputs yield `{}`.
pub fn merge_patch_diff(previous: &Value, current: &Value) -> Value {
    match (previous, current) {
        (Value::Object(prev), Value::Object(cur)) => {
            let mut patch = Map::new();
            for key in prev.keys().filter(|key| !cur.contains_key(*key)) {
                patch.insert(key.clone(), Value::Null);
            }
            for (key, cur_value) in cur {
                match prev.get(key) {
                    Some(prev_value) if prev_value == cur_value => {}
                    Some(prev_value @ Value::Object(_)) if cur_value.is_object() => {
                        patch.insert(key.clone(), merge_patch_diff(prev_value, cur_value));
                    }
                    _ => {
                        patch.insert(key.clone(), cur_value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ if previous == current => Value::Object(Map::new()),
        _ => current.clone(),
    }
}

/// Apply a merge patch in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                apply_merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
