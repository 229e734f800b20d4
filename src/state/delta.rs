//! Slice-level deltas between two states.

use super::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A changed slice: old and new values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceChange {
    pub old: Value,
    pub new: Value,
}

/// Difference between a base state and a newer state.
///
/// Applying a delta runs changes, then additions, then deletions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Slices present in both with different values.
    pub changes: BTreeMap<String, SliceChange>,
    /// Slices only present in the newer state.
    pub additions: BTreeMap<String, Value>,
    /// Slices only present in the base state.
    pub deletions: BTreeSet<String>,
}

impl StateDelta {
    /// Compute the delta that turns `base` into `current`.
    pub fn between(base: &State, current: &State) -> Self {
        let mut delta = StateDelta::default();

        for (name, value) in current.iter_shared() {
            match base.slice(name) {
                Some(old) if Arc::ptr_eq(&old, value) || old.as_ref() == value.as_ref() => {}
                Some(old) => {
                    delta.changes.insert(
                        name.clone(),
                        SliceChange {
                            old: old.as_ref().clone(),
                            new: value.as_ref().clone(),
                        },
                    );
                }
                None => {
                    delta.additions.insert(name.clone(), value.as_ref().clone());
                }
            }
        }

        for name in base.slice_names() {
            if !current.contains(name) {
                delta.deletions.insert(name.to_string());
            }
        }

        delta
    }

    /// Apply this delta on top of `base`.
    pub fn apply(&self, base: &State) -> State {
        let mut slices: BTreeMap<String, Arc<Value>> = base
            .iter_shared()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        for (name, change) in &self.changes {
            slices.insert(name.clone(), Arc::new(change.new.clone()));
        }
        for (name, value) in &self.additions {
            slices.insert(name.clone(), Arc::new(value.clone()));
        }
        for name in &self.deletions {
            slices.remove(name);
        }

        State::from_slices(slices)
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.additions.is_empty() && self.deletions.is_empty()
    }

    /// Number of touched slices.
    pub fn len(&self) -> usize {
        self.changes.len() + self.additions.len() + self.deletions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delta_classifies_slices() {
        let base = State::new()
            .with_slice("kept", json!(1))
            .with_slice("changed", json!("a"))
            .with_slice("removed", json!(true));
        let current = base
            .with_slice("changed", json!("b"))
            .with_slice("added", json!([1]))
            .without_slice("removed");

        let delta = StateDelta::between(&base, &current);
        assert_eq!(delta.changes.len(), 1);
        assert_eq!(delta.changes["changed"].old, json!("a"));
        assert_eq!(delta.additions["added"], json!([1]));
        assert!(delta.deletions.contains("removed"));

        assert_eq!(delta.apply(&base), current);
    }

    #[test]
    fn test_unchanged_state_has_empty_delta() {
        let base = State::new().with_slice("x", json!({"y": 1}));
        let copy = State::from_value(base.to_value()).unwrap();
        assert!(StateDelta::between(&base, &copy).is_empty());
    }
}
