//! The `elements` slice: normalized element storage.

use super::{reduce_typed, SliceReducer};
use crate::actions::{Action, ActionKind, Element, ElementAction};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Elements by id plus their display order and the current selection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementsState {
    pub by_id: BTreeMap<String, Element>,
    pub all_ids: Vec<String>,
    pub selected_ids: Vec<String>,
}

pub struct ElementsReducer;

impl SliceReducer for ElementsReducer {
    fn name(&self) -> &str {
        "elements"
    }

    fn default_value(&self) -> Value {
        serde_json::to_value(ElementsState::default()).unwrap_or(Value::Null)
    }

    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>> {
        let ActionKind::Element(element_action) = &action.kind else {
            return Ok(Arc::clone(slice));
        };

        reduce_typed(slice, |elements: &mut ElementsState| match element_action {
            ElementAction::Add(element) => {
                if !elements.by_id.contains_key(&element.id) {
                    elements.all_ids.push(element.id.clone());
                }
                elements.by_id.insert(element.id.clone(), element.clone());
                true
            }
            ElementAction::Update { id, properties } => match elements.by_id.get_mut(id) {
                Some(element) => {
                    for (key, value) in properties {
                        element.properties.insert(key.clone(), value.clone());
                    }
                    true
                }
                None => false,
            },
            ElementAction::Delete { id } => {
                if elements.by_id.remove(id).is_none() {
                    return false;
                }
                elements.all_ids.retain(|existing| existing != id);
                elements.selected_ids.retain(|existing| existing != id);
                for element in elements.by_id.values_mut() {
                    if element.parent_id.as_deref() == Some(id.as_str()) {
                        element.parent_id = None;
                    }
                }
                true
            }
            ElementAction::Move { id, index } => {
                let Some(current) = elements.all_ids.iter().position(|e| e == id) else {
                    return false;
                };
                let moved = elements.all_ids.remove(current);
                let target = (*index).min(elements.all_ids.len());
                elements.all_ids.insert(target, moved);
                current != target
            }
            ElementAction::Select { ids } => {
                let selected: Vec<String> = ids
                    .iter()
                    .filter(|id| elements.by_id.contains_key(*id))
                    .cloned()
                    .collect();
                if selected == elements.selected_ids {
                    return false;
                }
                elements.selected_ids = selected;
                true
            }
            ElementAction::ClearSelection => {
                if elements.selected_ids.is_empty() {
                    return false;
                }
                elements.selected_ids.clear();
                true
            }
        })
    }
}
