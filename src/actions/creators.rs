//! Action creators.

use super::types::{
    Action, AsyncAction, CustomAction, DocumentAction, Element, ElementAction, SystemAction,
    UiAction,
};
use crate::state::State;
use serde_json::{Map, Value};

// --- Document ---

pub fn create_document(id: impl Into<String>, title: impl Into<String>) -> Action {
    Action::new(
        DocumentAction::Create {
            id: id.into(),
            title: title.into(),
            properties: Map::new(),
        }
        .into(),
    )
}

pub fn update_document(properties: Map<String, Value>) -> Action {
    Action::new(DocumentAction::Update { properties }.into())
}

pub fn rename_document(title: impl Into<String>) -> Action {
    Action::new(DocumentAction::Rename { title: title.into() }.into())
}

pub fn mark_saved() -> Action {
    Action::new(DocumentAction::MarkSaved.into())
}

pub fn close_document() -> Action {
    Action::new(DocumentAction::Close.into())
}

// --- Elements ---

/// Add an element with only an id.
pub fn add_element(id: impl Into<String>) -> Action {
    add_element_with(Element::new(id))
}

pub fn add_element_with(element: Element) -> Action {
    Action::new(ElementAction::Add(element).into())
}

/// Merge `properties` into an element's properties.
pub fn update_element(id: impl Into<String>, properties: Map<String, Value>) -> Action {
    Action::new(
        ElementAction::Update {
            id: id.into(),
            properties,
        }
        .into(),
    )
}

pub fn delete_element(id: impl Into<String>) -> Action {
    Action::new(ElementAction::Delete { id: id.into() }.into())
}

/// Move an element to `index` in the element order.
pub fn move_element(id: impl Into<String>, index: usize) -> Action {
    Action::new(
        ElementAction::Move {
            id: id.into(),
            index,
        }
        .into(),
    )
}

pub fn select_elements<I, S>(ids: I) -> Action
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Action::new(
        ElementAction::Select {
            ids: ids.into_iter().map(Into::into).collect(),
        }
        .into(),
    )
}

pub fn clear_selection() -> Action {
    Action::new(ElementAction::ClearSelection.into())
}

// --- UI ---

pub fn set_theme(theme: impl Into<String>) -> Action {
    Action::new(UiAction::SetTheme { theme: theme.into() }.into())
}

pub fn set_zoom(zoom: f64) -> Action {
    Action::new(UiAction::SetZoom { zoom }.into())
}

pub fn toggle_panel(panel: impl Into<String>) -> Action {
    Action::new(UiAction::TogglePanel { panel: panel.into() }.into())
}

pub fn set_active_tool(tool: impl Into<String>) -> Action {
    Action::new(UiAction::SetActiveTool { tool: tool.into() }.into())
}

// --- Async ---

pub fn async_start(key: impl Into<String>) -> Action {
    Action::new(AsyncAction::Start { key: key.into() }.into())
}

pub fn async_success(key: impl Into<String>, result: Value) -> Action {
    Action::new(
        AsyncAction::Success {
            key: key.into(),
            result,
        }
        .into(),
    )
}

/// Failure of an async operation; the action carries the error flag.
pub fn async_failure(key: impl Into<String>, error: impl Into<String>) -> Action {
    let mut action = Action::new(
        AsyncAction::Failure {
            key: key.into(),
            error: error.into(),
        }
        .into(),
    );
    action.error = true;
    action
}

// --- System ---

pub fn init() -> Action {
    Action::new(SystemAction::Init.into())
}

pub fn reducer_replaced() -> Action {
    Action::new(SystemAction::ReducerReplaced.into())
}

/// Replace the whole state with `state`.
pub fn hydrate(state: State) -> Action {
    Action::new(SystemAction::Hydrate { state }.into())
}

pub fn reset() -> Action {
    Action::new(SystemAction::Reset.into())
}

// --- Custom ---

/// Application-defined action.
pub fn custom(action_type: impl Into<String>, payload: Value) -> Action {
    Action::new(
        CustomAction {
            action_type: action_type.into(),
            payload,
        }
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creators_set_type_tags() {
        assert_eq!(add_element("e1").action_type(), "ADD_ELEMENT");
        assert_eq!(delete_element("e1").action_type(), "DELETE_ELEMENT");
        assert_eq!(set_zoom(2.0).action_type(), "SET_ZOOM");
        assert_eq!(hydrate(State::new()).action_type(), "@@HYDRATE");
        assert_eq!(custom("PING", Value::Null).action_type(), "PING");
        assert!(async_failure("load", "boom").error);
    }

    #[test]
    fn test_creators_assign_unique_ids() {
        let a = mark_saved();
        let b = mark_saved();
        assert_ne!(a.id, b.id);
        assert!(b.timestamp > a.timestamp);
    }
}
