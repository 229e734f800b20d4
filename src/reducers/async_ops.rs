//! The `async` slice: status of in-flight operations.

use super::{reduce_typed, SliceReducer};
use crate::actions::{Action, ActionKind, AsyncAction};
use crate::error::Result;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncStatus {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationState {
    pub status: AsyncStatus,
    pub error: Option<String>,
    pub result: Value,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// Operation key to its state.
pub type AsyncState = BTreeMap<String, OperationState>;

pub struct AsyncReducer;

impl SliceReducer for AsyncReducer {
    fn name(&self) -> &str {
        "async"
    }

    fn default_value(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn reduce(&self, slice: &Arc<Value>, action: &Action) -> Result<Arc<Value>> {
        let ActionKind::Async(async_action) = &action.kind else {
            return Ok(Arc::clone(slice));
        };

        reduce_typed(slice, |ops: &mut AsyncState| {
            let op = ops.entry(async_action.key().to_string()).or_default();
            match async_action {
                AsyncAction::Start { .. } => {
                    *op = OperationState {
                        status: AsyncStatus::Pending,
                        started_at: Some(action.timestamp),
                        ..Default::default()
                    };
                }
                AsyncAction::Success { result, .. } => {
                    op.status = AsyncStatus::Succeeded;
                    op.error = None;
                    op.result = result.clone();
                    op.finished_at = Some(action.timestamp);
                }
                AsyncAction::Failure { error, .. } => {
                    op.status = AsyncStatus::Failed;
                    op.error = Some(error.clone());
                    op.finished_at = Some(action.timestamp);
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

    #[test]
    fn test_operation_lifecycle() {
        let reducer = AsyncReducer;
        let slice = Arc::new(reducer.default_value());
        let slice = reducer.reduce(&slice, &creators::async_start("load")).unwrap();
        let ops: AsyncState = serde_json::from_value(slice.as_ref().clone()).unwrap();
        assert_eq!(ops["load"].status, AsyncStatus::Pending);

        let slice = reducer
            .reduce(&slice, &creators::async_success("load", json!({"rows": 3})))
            .unwrap();
        let ops: AsyncState = serde_json::from_value(slice.as_ref().clone()).unwrap();
        assert_eq!(ops["load"].status, AsyncStatus::Succeeded);
        assert_eq!(ops["load"].result["rows"], 3);
        assert!(ops["load"].started_at.is_some());

        let slice = reducer
            .reduce(&slice, &creators::async_failure("save", "disk full"))
            .unwrap();
        let ops: AsyncState = serde_json::from_value(slice.as_ref().clone()).unwrap();
        assert_eq!(ops["save"].status, AsyncStatus::Failed);
        assert_eq!(ops["save"].error.as_deref(), Some("disk full"));
    }
}
