//! Reversible diffs over JSON values.
//!
//! The storage engine only needs three operations from the diff library:
//! `diff` two values, `patch` forward, and `rollback` backward. Exact
//! invertibility is obtained by keeping both the forward and the reverse
//! RFC 6902 patch in the serialized [`DiffResult`], so applying
//! `rollback` after `patch` restores the original value byte for byte.

use json_patch::{Patch, PatchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reversible change between two JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    forward: Patch,
    reverse: Patch,
}

impl DiffResult {
    pub fn empty() -> Self {
        Self {
            forward: Patch(Vec::new()),
            reverse: Patch(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.forward.0.is_empty() && self.reverse.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        // Patch serialization is infallible: paths are strings and
        // operands are plain JSON values.
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl Default for DiffResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Compute the reversible diff from `old` to `new`.
pub fn diff(old: &Value, new: &Value) -> DiffResult {
    DiffResult {
        forward: json_patch::diff(old, new),
        reverse: json_patch::diff(new, old),
    }
}

/// Apply `diff` forward to `value`.
pub fn patch(value: &Value, diff: &DiffResult) -> Result<Value, PatchError> {
    let mut doc = value.clone();
    json_patch::patch(&mut doc, &diff.forward)?;
    Ok(doc)
}

/// Apply `diff` backward to `value`, undoing an earlier `patch`.
pub fn rollback(value: &Value, diff: &DiffResult) -> Result<Value, PatchError> {
    let mut doc = value.clone();
    json_patch::patch(&mut doc, &diff.reverse)?;
    Ok(doc)
}
