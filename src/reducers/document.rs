//! The `document` slice.

use super::{reduce_typed, SliceReducer};
use crate::actions::{Action, ActionKind, DocumentAction};
use crate::error::Result;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Metadata of the open document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentState {
    pub id: Option<String>,
    pub title: String,
    pub properties: Map<String, Value>,
    /// Unsaved changes exist.
    pub dirty: bool,
    /// Bumped on every edit.
    pub version: u64,
    pub last_saved: Option<Timestamp>,
}

pub struct DocumentReducer;

impl SliceReducer for DocumentReducer {
    fn name(&self) -> &str {
        "document"
    }

    fn default_value(&self) -> Value {
        serde_json::to_value(DocumentState::default()).unwrap_or(Value::Null)
    }

    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>> {
        let ActionKind::Document(doc_action) = &action.kind else {
            return Ok(Arc::clone(slice));
        };

        reduce_typed(slice, |doc: &mut DocumentState| {
            match doc_action {
                DocumentAction::Create {
                    id,
                    title,
                    properties,
                } => {
                    *doc = DocumentState {
                        id: Some(id.clone()),
                        title: title.clone(),
                        properties: properties.clone(),
                        ..Default::default()
                    };
                }
                DocumentAction::Update { properties } => {
                    for (key, value) in properties {
                        doc.properties.insert(key.clone(), value.clone());
                    }
                    doc.dirty = true;
                    doc.version += 1;
                }
                DocumentAction::Rename { title } => {
                    if doc.title == *title {
                        return false;
                    }
                    doc.title = title.clone();
                    doc.dirty = true;
                    doc.version += 1;
                }
                DocumentAction::MarkSaved => {
                    doc.dirty = false;
                    doc.last_saved = Some(action.timestamp);
                }
                DocumentAction::Close => {
                    *doc = DocumentState::default();
                }
            }
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::creators;
    use serde_json::json;

    fn run(actions: &[Action]) -> DocumentState {
        let reducer = DocumentReducer;
        let mut slice = Arc::new(reducer.default_value());
        for action in actions {
            slice = reducer.reduce(&slice, action).unwrap();
        }
        serde_json::from_value(slice.as_ref().clone()).unwrap()
    }

    #[test]
    fn test_edit_then_save() {
        let mut props = Map::new();
        props.insert("author".into(), json!("ada"));

        let doc = run(&[
            creators::create_document("d1", "Draft"),
            creators::update_document(props),
            creators::rename_document("Final"),
        ]);
        assert_eq!(doc.title, "Final");
        assert_eq!(doc.properties["author"], json!("ada"));
        assert!(doc.dirty);
        assert_eq!(doc.version, 2);

        let saved = creators::mark_saved();
        let doc = run(&[creators::create_document("d1", "Draft"), saved.clone()]);
        assert!(!doc.dirty);
        assert_eq!(doc.last_saved, Some(saved.timestamp));
    }

    #[test]
    fn test_rename_to_same_title_is_unchanged() {
        let reducer = DocumentReducer;
        let slice = reducer
            .reduce(
                &Arc::new(reducer.default_value()),
                &creators::create_document("d1", "Same"),
            )
            .unwrap();
        let next = reducer
            .reduce(&slice, &creators::rename_document("Same"))
            .unwrap();
        assert!(Arc::ptr_eq(&slice, &next));
    }
}
