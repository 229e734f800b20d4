//! The `ui` slice.

use super::{reduce_typed, SliceReducer};
use crate::actions::{Action, ActionKind, UiAction};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiState {
    pub theme: String,
    pub zoom: f64,
    pub open_panels: BTreeSet<String>,
    pub active_tool: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            zoom: 1.0,
            open_panels: BTreeSet::new(),
            active_tool: None,
        }
    }
}

pub struct UiReducer;

impl SliceReducer for UiReducer {
    fn name(&self) -> &str {
        "ui"
    }

    fn default_value(&self) -> Value {
        serde_json::to_value(UiState::default()).unwrap_or(Value::Null)
    }

    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>> {
        let ActionKind::Ui(ui_action) = &action.kind else {
            return Ok(Arc::clone(slice));
        };

        reduce_typed(slice, |ui: &mut UiState| match ui_action {
            UiAction::SetTheme { theme } => {
                if ui.theme == *theme {
                    return false;
                }
                ui.theme = theme.clone();
                true
            }
            UiAction::SetZoom { zoom } => {
                // NaN falls back to the default zoom.
                let zoom = if zoom.is_nan() {
                    1.0
                } else {
                    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
                };
                if ui.zoom == zoom {
                    return false;
                }
                ui.zoom = zoom;
                true
            }
            UiAction::TogglePanel { panel } => {
                if !ui.open_panels.remove(panel) {
                    ui.open_panels.insert(panel.clone());
                }
                true
            }
            UiAction::SetActiveTool { tool } => {
                if ui.active_tool.as_deref() == Some(tool.as_str()) {
                    return false;
                }
                ui.active_tool = Some(tool.clone());
                true
            }
        })
    }
}
