//! Actions: immutable records describing a state transition.
//!
//! Actions are a closed sum type grouped by category (document, element,
//! ui, async, system), plus a `Custom` escape hatch for slices an
//! application registers itself. Reducers match on them exhaustively.

pub mod creators;
mod types;

pub use types::{
    Action, ActionCategory, ActionKind, AsyncAction, CustomAction, DocumentAction, Element,
    ElementAction, SystemAction, UiAction, META_SKIP_HISTORY, META_SKIP_PERSISTENCE,
};
