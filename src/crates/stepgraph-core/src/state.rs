//! Shared key-value state for a workflow
//!
//! Every [`Workflow`](crate::workflow::Workflow) owns one [`SharedState`].
//! Tool callables and the engine read and write it only through this API;
//! there is no raw map access. The store outlives individual runs and keeps
//! its contents until [`SharedState::clear`] is called.

use crate::error::{CoreError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Cheaply cloneable handle to a workflow's key-value state.
///
/// All clones point at the same underlying map. Compound operations
/// ([`append`](Self::append), [`increment`](Self::increment)) hold the store
/// lock for their whole read-modify-write, so concurrent branches cannot
/// lose updates to the same key.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key to a value, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    /// Get a value by key, falling back to `default` when absent.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Whether the store contains `key`.
    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Append a value to the list stored at `key`.
    ///
    /// A missing key is initialized to a one-element list. An existing
    /// non-list value is an error rather than a silent overwrite.
    pub fn append(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut map = self.inner.lock();
        match map.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Value::Array(vec![value]));
                Ok(())
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Value::Array(items) => {
                    items.push(value);
                    Ok(())
                }
                other => Err(CoreError::StateType {
                    key: key.to_string(),
                    expected: "array",
                    found: value_type_name(other).to_string(),
                }),
            },
        }
    }

    /// Add `delta` to the integer stored at `key`, treating a missing key as
    /// `default`. Returns the new value.
    pub fn increment(&self, key: &str, delta: i64, default: i64) -> Result<i64> {
        let mut map = self.inner.lock();
        let current = match map.get(key) {
            None => default,
            Some(value) => value.as_i64().ok_or_else(|| CoreError::StateType {
                key: key.to_string(),
                expected: "integer",
                found: value_type_name(value).to_string(),
            })?,
        };
        let next = current + delta;
        map.insert(key.to_string(), Value::from(next));
        Ok(next)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Shallow copy of all entries.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Human-readable JSON type name, used in state type errors.
pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
