//! Serializable form of a whole history.

use super::branch::HistoryBranch;
use super::HistoryStats;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every branch with its entries, the cursor and the stats.
///
/// ```json
/// {"branches": {"main": {"id": "main", "name": "main", "parentEntryId": null,
///   "createdAt": 0, "metadata": {}, "entries": []}},
///  "currentBranch": "main", "currentIndex": null, "stats": {...}, "exportedAt": 0}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub branches: BTreeMap<String, HistoryBranch>,
    pub current_branch: String,
    pub current_index: Option<usize>,
    #[serde(default)]
    pub stats: HistoryStats,
    pub exported_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use crate::actions::creators;
    use crate::error::StoreError;
    use crate::history::{HistoryConfig, HistoryEngine, MAIN_BRANCH};
    use crate::state::State;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn populated() -> HistoryEngine {
        let engine = HistoryEngine::new(HistoryConfig {
            enable_branching: true,
            ..Default::default()
        });
        for i in 0..3 {
            engine.record_action(
                creators::set_zoom(1.0 + i as f64),
                State::new().with_slice("zoom", json!(i)),
                State::new().with_slice("zoom", json!(i + 1)),
                0.25,
                BTreeMap::new(),
            );
        }
        engine.create_branch("alt", None).unwrap();
        engine.switch_branch("alt").unwrap();
        engine.record_action(
            creators::set_theme("dark"),
            State::new(),
            State::new().with_slice("theme", json!("dark")),
            0.25,
            BTreeMap::new(),
        );
        engine
    }

    #[test]
    fn test_json_roundtrip_preserves_topology() {
        let engine = populated();
        let export = engine.export();
        let json = engine.export_json().unwrap();

        let restored = HistoryEngine::new(HistoryConfig {
            enable_branching: true,
            ..Default::default()
        });
        restored.import_json(&json).unwrap();
        let again = restored.export();

        assert_eq!(again.branches, export.branches);
        assert_eq!(again.current_branch, export.current_branch);
        assert_eq!(again.current_index, Some(0));
        assert_eq!(again.stats, export.stats);
        assert_eq!(restored.branch_len(MAIN_BRANCH).unwrap(), 3);
    }

    #[test]
    fn test_export_document_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&populated().export_json().unwrap()).unwrap();
        for key in ["branches", "currentBranch", "currentIndex", "stats", "exportedAt"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        let main = &value["branches"][MAIN_BRANCH];
        assert!(main.get("parentEntryId").is_some());
        assert_eq!(main["entries"].as_array().unwrap().len(), 3);
        assert!(main["entries"][0].get("stateBefore").is_some());
    }

    #[test]
    fn test_import_rejects_bad_cursor() {
        let engine = populated();
        let mut export = engine.export();
        export.current_index = Some(99);

        let target = HistoryEngine::default();
        assert!(matches!(
            target.import(export),
            Err(StoreError::InvalidFormat(_))
        ));
        assert!(target.is_empty());
    }
}
