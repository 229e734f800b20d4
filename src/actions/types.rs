//! Action records and their typed payloads.

use crate::error::{Result, StoreError};
use crate::state::State;
use crate::types::{new_id, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Meta key that excludes an action from automatic persistence.
pub const META_SKIP_PERSISTENCE: &str = "skip_persistence";

/// Meta key that excludes an action from history recording.
pub const META_SKIP_HISTORY: &str = "skip_history";

/// A document-level element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Element {
    /// Element with an id and no properties.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the element kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Set one property.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Actions on the open document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DocumentAction {
    #[serde(rename = "CREATE_DOCUMENT")]
    Create {
        id: String,
        title: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    #[serde(rename = "UPDATE_DOCUMENT")]
    Update { properties: Map<String, Value> },
    #[serde(rename = "RENAME_DOCUMENT")]
    Rename { title: String },
    #[serde(rename = "MARK_SAVED")]
    MarkSaved,
    #[serde(rename = "CLOSE_DOCUMENT")]
    Close,
}

impl DocumentAction {
    pub fn type_tag(&self) -> &'static str {
        match self {
            DocumentAction::Create { .. } => "CREATE_DOCUMENT",
            DocumentAction::Update { .. } => "UPDATE_DOCUMENT",
            DocumentAction::Rename { .. } => "RENAME_DOCUMENT",
            DocumentAction::MarkSaved => "MARK_SAVED",
            DocumentAction::Close => "CLOSE_DOCUMENT",
        }
    }
}

/// Actions on document elements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ElementAction {
    #[serde(rename = "ADD_ELEMENT")]
    Add(Element),
    #[serde(rename = "UPDATE_ELEMENT")]
    Update {
        id: String,
        properties: Map<String, Value>,
    },
    #[serde(rename = "DELETE_ELEMENT")]
    Delete { id: String },
    #[serde(rename = "MOVE_ELEMENT")]
    Move { id: String, index: usize },
    #[serde(rename = "SELECT_ELEMENTS")]
    Select { ids: Vec<String> },
    #[serde(rename = "CLEAR_SELECTION")]
    ClearSelection,
}

impl ElementAction {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ElementAction::Add(_) => "ADD_ELEMENT",
            ElementAction::Update { .. } => "UPDATE_ELEMENT",
            ElementAction::Delete { .. } => "DELETE_ELEMENT",
            ElementAction::Move { .. } => "MOVE_ELEMENT",
            ElementAction::Select { .. } => "SELECT_ELEMENTS",
            ElementAction::ClearSelection => "CLEAR_SELECTION",
        }
    }
}

/// Actions on editor UI state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UiAction {
    #[serde(rename = "SET_THEME")]
    SetTheme { theme: String },
    #[serde(rename = "SET_ZOOM")]
    SetZoom { zoom: f64 },
    #[serde(rename = "TOGGLE_PANEL")]
    TogglePanel { panel: String },
    #[serde(rename = "SET_ACTIVE_TOOL")]
    SetActiveTool { tool: String },
}

impl UiAction {
    pub fn type_tag(&self) -> &'static str {
        match self {
            UiAction::SetTheme { .. } => "SET_THEME",
            UiAction::SetZoom { .. } => "SET_ZOOM",
            UiAction::TogglePanel { .. } => "TOGGLE_PANEL",
            UiAction::SetActiveTool { .. } => "SET_ACTIVE_TOOL",
        }
    }
}

/// Lifecycle of asynchronous operations, keyed by operation name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AsyncAction {
    #[serde(rename = "ASYNC_START")]
    Start { key: String },
    #[serde(rename = "ASYNC_SUCCESS")]
    Success {
        key: String,
        #[serde(default)]
        result: Value,
    },
    #[serde(rename = "ASYNC_FAILURE")]
    Failure { key: String, error: String },
}

impl AsyncAction {
    pub fn type_tag(&self) -> &'static str {
        match self {
            AsyncAction::Start { .. } => "ASYNC_START",
            AsyncAction::Success { .. } => "ASYNC_SUCCESS",
            AsyncAction::Failure { .. } => "ASYNC_FAILURE",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            AsyncAction::Start { key }
            | AsyncAction::Success { key, .. }
            | AsyncAction::Failure { key, .. } => key,
        }
    }
}

/// Internal store actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SystemAction {
    #[serde(rename = "@@INIT")]
    Init,
    #[serde(rename = "@@REDUCER_REPLACED")]
    ReducerReplaced,
    /// Replace the whole state (time travel, restore from storage).
    #[serde(rename = "@@HYDRATE")]
    Hydrate { state: State },
    /// Drop every slice back to its default.
    #[serde(rename = "@@RESET")]
    Reset,
}

impl SystemAction {
    pub fn type_tag(&self) -> &'static str {
        match self {
            SystemAction::Init => "@@INIT",
            SystemAction::ReducerReplaced => "@@REDUCER_REPLACED",
            SystemAction::Hydrate { .. } => "@@HYDRATE",
            SystemAction::Reset => "@@RESET",
        }
    }
}

/// Application-defined action for slices registered outside the built-ins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Every action the store understands, grouped by category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionKind {
    Document(DocumentAction),
    Element(ElementAction),
    Ui(UiAction),
    Async(AsyncAction),
    System(SystemAction),
    Custom(CustomAction),
}

/// Category of an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Document,
    Element,
    Ui,
    Async,
    System,
    Custom,
}

impl ActionKind {
    /// The action's type tag, e.g. `ADD_ELEMENT`.
    pub fn action_type(&self) -> &str {
        match self {
            ActionKind::Document(a) => a.type_tag(),
            ActionKind::Element(a) => a.type_tag(),
            ActionKind::Ui(a) => a.type_tag(),
            ActionKind::Async(a) => a.type_tag(),
            ActionKind::System(a) => a.type_tag(),
            ActionKind::Custom(a) => &a.action_type,
        }
    }

    pub fn category(&self) -> ActionCategory {
        match self {
            ActionKind::Document(_) => ActionCategory::Document,
            ActionKind::Element(_) => ActionCategory::Element,
            ActionKind::Ui(_) => ActionCategory::Ui,
            ActionKind::Async(_) => ActionCategory::Async,
            ActionKind::System(_) => ActionCategory::System,
            ActionKind::Custom(_) => ActionCategory::Custom,
        }
    }
}

/// An immutable action record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier.
    pub id: String,

    /// What happened, with its payload.
    pub kind: ActionKind,

    /// Free-form metadata.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,

    /// Marks actions that describe a failure.
    #[serde(default)]
    pub error: bool,

    /// Creation time.
    pub timestamp: Timestamp,
}

impl Action {
    /// Create a new action with a fresh id and timestamp.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: new_id(),
            kind,
            meta: BTreeMap::new(),
            error: false,
            timestamp: Timestamp::now(),
        }
    }

    /// The action's type tag.
    pub fn action_type(&self) -> &str {
        self.kind.action_type()
    }

    pub fn category(&self) -> ActionCategory {
        self.kind.category()
    }

    /// Copy of this action with one more metadata entry.
    pub fn with_meta(&self, key: impl Into<String>, value: Value) -> Action {
        let mut action = self.clone();
        action.meta.insert(key.into(), value);
        action
    }

    /// Copy of this action with the error flag set.
    pub fn with_error(&self, error: bool) -> Action {
        let mut action = self.clone();
        action.error = error;
        action
    }

    /// Copy of this action that automatic persistence ignores.
    pub fn skip_persistence(&self) -> Action {
        self.with_meta(META_SKIP_PERSISTENCE, Value::Bool(true))
    }

    /// Read a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Whether a boolean metadata flag is set.
    pub fn meta_flag(&self, key: &str) -> bool {
        matches!(self.meta.get(key), Some(Value::Bool(true)))
    }

    /// Whether this is an internal `@@` action.
    pub fn is_system(&self) -> bool {
        matches!(self.kind, ActionKind::System(_))
    }

    /// Check the action is well formed.
    pub fn validate(&self) -> Result<()> {
        if self.action_type().trim().is_empty() {
            return Err(StoreError::Validation("action type is empty".into()));
        }
        if self.id.trim().is_empty() {
            return Err(StoreError::Validation(format!(
                "action {} has an empty id",
                self.action_type()
            )));
        }
        if self.timestamp.0 <= 0 {
            return Err(StoreError::Validation(format!(
                "action {} has non-positive timestamp {}",
                self.action_type(),
                self.timestamp.0
            )));
        }
        Ok(())
    }
}

impl From<DocumentAction> for ActionKind {
    fn from(a: DocumentAction) -> Self {
        ActionKind::Document(a)
    }
}

impl From<ElementAction> for ActionKind {
    fn from(a: ElementAction) -> Self {
        ActionKind::Element(a)
    }
}

impl From<UiAction> for ActionKind {
    fn from(a: UiAction) -> Self {
        ActionKind::Ui(a)
    }
}

impl From<AsyncAction> for ActionKind {
    fn from(a: AsyncAction) -> Self {
        ActionKind::Async(a)
    }
}

impl From<SystemAction> for ActionKind {
    fn from(a: SystemAction) -> Self {
        ActionKind::System(a)
    }
}

impl From<CustomAction> for ActionKind {
    fn from(a: CustomAction) -> Self {
        ActionKind::Custom(a)
    }
}
