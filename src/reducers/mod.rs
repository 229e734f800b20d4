//! Reducers: pure functions from `(state, action)` to the next state.
//!
//! A root reducer implements [`Reducer`]. [`combine_reducers`] builds one
//! from per-slice [`SliceReducer`]s; every slice reducer sees every action
//! and hands back the same `Arc` when the action does not concern it.

mod async_ops;
mod document;
mod elements;
mod ui;

pub use async_ops::{AsyncReducer, AsyncState, AsyncStatus, OperationState};
pub use document::{DocumentReducer, DocumentState};
pub use elements::{ElementsReducer, ElementsState};
pub use ui::{UiReducer, UiState, MAX_ZOOM, MIN_ZOOM};

use crate::actions::{Action, ActionKind, SystemAction};
use crate::error::{Result, StoreError};
use crate::state::State;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Computes the next whole state.
pub trait Reducer: Send + Sync {
    fn reduce(&self, state: &State, action: &Action) -> Result<State>;
}

impl<F> Reducer for F
where
    F: Fn(&State, &Action) -> Result<State> + Send + Sync,
{
    fn reduce(&self, state: &State, action: &Action) -> Result<State> {
        self(state, action)
    }
}

/// Computes the next value of one named slice.
pub trait SliceReducer: Send + Sync {
    /// Slice name in the state map.
    fn name(&self) -> &str;

    /// Value used when the slice is absent.
    fn default_value(&self) -> Value;

    /// Next slice value. Return `Arc::clone(slice)` when unaffected.
    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>>;
}

/// Slice reducer backed by a closure.
pub struct FnSliceReducer<F> {
    name: String,
    default: Value,
    f: F,
}

impl<F> SliceReducer for FnSliceReducer<F>
where
    F: Fn(&Arc<Value>, &Action) -> Result<Arc<Value>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_value(&self) -> Value {
        self.default.clone()
    }

    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>> {
        (self.f)(slice, action)
    }
}

/// Wrap a closure as a slice reducer.
pub fn slice_fn<F>(name: impl Into<String>, default: Value, f: F) -> Box<dyn SliceReducer>
where
    F: Fn(&Arc<Value>, &Action) -> Result<Arc<Value>> + Send + Sync + 'static,
{
    Box::new(FnSliceReducer {
        name: name.into(),
        default,
        f,
    })
}

/// Root reducer running every slice reducer for every action.
pub struct CombinedReducer {
    slices: Vec<Box<dyn SliceReducer>>,
}

impl CombinedReducer {
    /// Names of the slices this reducer owns, in registration order.
    pub fn slice_names(&self) -> Vec<&str> {
        self.slices.iter().map(|s| s.name()).collect()
    }

    /// State with every slice at its default.
    pub fn initial_state(&self) -> State {
        State::from_slices(
            self.slices
                .iter()
                .map(|s| (s.name().to_string(), Arc::new(s.default_value())))
                .collect(),
        )
    }
}

impl Reducer for CombinedReducer {
    fn reduce(&self, state: &State, action: &Action) -> Result<State> {
        let base = match &action.kind {
            ActionKind::System(SystemAction::Hydrate { state }) => state.clone(),
            ActionKind::System(SystemAction::Reset) => State::new(),
            _ => state.clone(),
        };

        // Slices no reducer owns are carried over untouched.
        let mut next: BTreeMap<String, Arc<Value>> = base
            .iter_shared()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        for slice in &self.slices {
            let previous = base
                .slice(slice.name())
                .unwrap_or_else(|| Arc::new(slice.default_value()));
            let reduced = slice.reduce(&previous, action)?;
            next.insert(slice.name().to_string(), reduced);
        }

        Ok(State::from_slices(next))
    }
}

/// Combine slice reducers into a root reducer.
pub fn combine_reducers(slices: Vec<Box<dyn SliceReducer>>) -> CombinedReducer {
    CombinedReducer { slices }
}

/// Root reducer with the built-in `document`, `elements`, `ui` and `async` slices.
pub fn default_reducer() -> CombinedReducer {
    combine_reducers(default_slices())
}

/// The built-in slice reducers.
pub fn default_slices() -> Vec<Box<dyn SliceReducer>> {
    vec![
        Box::new(DocumentReducer),
        Box::new(ElementsReducer),
        Box::new(UiReducer),
        Box::new(AsyncReducer),
    ]
}

/// Decode a slice as `T`, let `f` edit it, and re-encode if `f` reports a change.
pub(crate) fn reduce_typed<T, F>(slice: &Arc<Value>, f: F) -> Result<Arc<Value>>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T) -> bool,
{
    let mut typed: T = if slice.is_null() {
        T::default()
    } else {
        serde_json::from_value(slice.as_ref().clone())
            .map_err(|e| StoreError::Reducer(format!("malformed slice: {}", e)))?
    };

    if !f(&mut typed) {
        return Ok(Arc::clone(slice));
    }

    let value = serde_json::to_value(&typed)
        .map_err(|e| StoreError::Reducer(format!("unencodable slice: {}", e)))?;
    Ok(Arc::new(value))
}
