//! The store's state value.
//!
//! A `State` maps slice names to JSON slice values. Both the top-level map
//! and every slice sit behind `Arc`, so cloning a state, keeping it in a
//! history entry or handing it to a subscriber never copies slice data. A
//! transition replaces only the slices that changed; untouched slices stay
//! pointer-equal to their predecessors.

mod delta;

pub use delta::{SliceChange, StateDelta};

use crate::error::{Result, StoreError};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Immutable, structurally shared mapping from slice name to slice value.
#[derive(Clone, Default)]
pub struct State {
    slices: Arc<BTreeMap<String, Arc<Value>>>,
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from already shared slices.
    pub fn from_slices(slices: BTreeMap<String, Arc<Value>>) -> Self {
        Self {
            slices: Arc::new(slices),
        }
    }

    /// Build a state from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_slices(
                map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            )),
            other => Err(StoreError::Deserialization(format!(
                "State must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Convert to a JSON object (copies slice data).
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.slices
                .iter()
                .map(|(k, v)| (k.clone(), v.as_ref().clone()))
                .collect(),
        )
    }

    /// Get a slice value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slices.get(name).map(|v| v.as_ref())
    }

    /// Get a shared handle to a slice.
    pub fn slice(&self, name: &str) -> Option<Arc<Value>> {
        self.slices.get(name).cloned()
    }

    /// Return a new state with `name` set to `value`. Other slices are shared.
    pub fn with_slice(&self, name: impl Into<String>, value: impl Into<Arc<Value>>) -> State {
        let mut slices = (*self.slices).clone();
        slices.insert(name.into(), value.into());
        State::from_slices(slices)
    }

    /// Return a new state without `name`.
    pub fn without_slice(&self, name: &str) -> State {
        let mut slices = (*self.slices).clone();
        slices.remove(name);
        State::from_slices(slices)
    }

    /// Whether the slice exists.
    pub fn contains(&self, name: &str) -> bool {
        self.slices.contains_key(name)
    }

    /// Slice names in sorted order.
    pub fn slice_names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    /// Iterate `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slices.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Iterate `(name, shared value)` pairs.
    pub fn iter_shared(&self) -> impl Iterator<Item = (&String, &Arc<Value>)> {
        self.slices.iter()
    }

    /// Number of slices.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// Whether there are no slices.
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Whether both states share the same top-level map.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.slices, &other.slices)
    }

    /// Whether the named slice is shared between both states.
    pub fn slice_ptr_eq(&self, other: &State, name: &str) -> bool {
        match (self.slices.get(name), other.slices.get(name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Names of slices that were added, removed or changed between `self` and `other`.
    pub fn changed_slices(&self, other: &State) -> Vec<String> {
        if self.ptr_eq(other) {
            return Vec::new();
        }
        let mut changed = Vec::new();
        for (name, value) in self.slices.iter() {
            let same = match other.slices.get(name) {
                Some(other_value) => Arc::ptr_eq(value, other_value) || value == other_value,
                None => false,
            };
            if !same {
                changed.push(name.clone());
            }
        }
        changed.extend(
            other
                .slices
                .keys()
                .filter(|name| !self.slices.contains_key(*name))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Serialized JSON size in bytes.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.slices.len() != other.slices.len() {
            return false;
        }
        self.slices.iter().all(|(name, value)| match other.slices.get(name) {
            Some(other_value) => Arc::ptr_eq(value, other_value) || value == other_value,
            None => false,
        })
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slices.iter().map(|(k, v)| (k, v.as_ref())))
            .finish()
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.slices.iter().map(|(k, v)| (k, v.as_ref())))
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(State::from_slices(
            map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        ))
    }
}

impl From<BTreeMap<String, Value>> for State {
    fn from(map: BTreeMap<String, Value>) -> Self {
        State::from_slices(map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect())
    }
}

/// Whether a slice value carries content (non-null, non-empty).
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
