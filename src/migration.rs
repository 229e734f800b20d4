//! Schema migrations for persisted states.
//!
//! Steps are registered between pairs of schema versions. Migrating from
//! one version to another follows the shortest chain of registered steps.
//! The whole chain runs on a copy; a failing step leaves the caller's state
//! as it was.

use crate::error::{Result, StoreError};
use crate::state::State;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A single migration step over the JSON form of a state.
pub type MigrationFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

struct Step {
    from: u32,
    to: u32,
    description: String,
    apply: MigrationFn,
}

/// Registered migration steps.
#[derive(Default)]
pub struct MigrationRegistry {
    steps: Vec<Step>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step from `from` to `to`.
    pub fn register<F>(
        &mut self,
        from: u32,
        to: u32,
        description: impl Into<String>,
        apply: F,
    ) -> Result<&mut Self>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        if from == to {
            return Err(StoreError::Config(format!(
                "Migration step must change the version (got {} -> {})",
                from, to
            )));
        }
        if self.steps.iter().any(|s| s.from == from && s.to == to) {
            return Err(StoreError::Config(format!(
                "Migration {} -> {} is already registered",
                from, to
            )));
        }
        self.steps.push(Step {
            from,
            to,
            description: description.into(),
            apply: Arc::new(apply),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Shortest chain of steps from `from` to `to`, as version pairs.
    pub fn path(&self, from: u32, to: u32) -> Result<Vec<(u32, u32)>> {
        Ok(self
            .resolve(from, to)?
            .into_iter()
            .map(|i| (self.steps[i].from, self.steps[i].to))
            .collect())
    }

    /// Breadth-first search over step indices.
    fn resolve(&self, from: u32, to: u32) -> Result<Vec<usize>> {
        if from == to {
            return Ok(Vec::new());
        }

        let mut outgoing: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            outgoing.entry(step.from).or_default().push(i);
        }

        // version -> step that first reached it
        let mut reached_by: HashMap<u32, usize> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(version) = queue.pop_front() {
            if version == to {
                break;
            }
            for &i in outgoing.get(&version).into_iter().flatten() {
                let next = self.steps[i].to;
                if next != from && !reached_by.contains_key(&next) {
                    reached_by.insert(next, i);
                    queue.push_back(next);
                }
            }
        }

        let mut chain = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let i = *reached_by.get(&cursor).ok_or_else(|| {
                StoreError::Migration(format!("No migration path from {} to {}", from, to))
            })?;
            chain.push(i);
            cursor = self.steps[i].from;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Migrate `state` from schema version `from` to `to`.
    pub fn migrate(&self, state: &State, from: u32, to: u32) -> Result<State> {
        let chain = self.resolve(from, to)?;
        if chain.is_empty() {
            return Ok(state.clone());
        }

        let mut value = state.to_value();
        for i in chain {
            let step = &self.steps[i];
            tracing::debug!(from = step.from, to = step.to, description = %step.description, "applying migration");
            value = (step.apply)(value).map_err(|e| {
                StoreError::Migration(format!(
                    "Step {} -> {} ({}) failed: {}",
                    step.from, step.to, step.description, e
                ))
            })?;
        }

        State::from_value(value).map_err(|e| {
            StoreError::Migration(format!("Migrated value is not a valid state: {}", e))
        })
    }
}
