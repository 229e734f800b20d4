//! Automatic snapshot tags.

use super::SnapshotType;
use crate::state::{has_content, State};
use crate::types::Timestamp;

const SMALL_LIMIT: usize = 10 * 1024;
const MEDIUM_LIMIT: usize = 1024 * 1024;

/// `small` below 10 KiB, `medium` below 1 MiB, otherwise `large`.
pub fn size_class(size_bytes: usize) -> &'static str {
    if size_bytes < SMALL_LIMIT {
        "small"
    } else if size_bytes < MEDIUM_LIMIT {
        "medium"
    } else {
        "large"
    }
}

/// Date, type, size and `has:<slice>` tags for a snapshot of `state`.
pub fn auto_tags(
    state: &State,
    timestamp: Timestamp,
    snapshot_type: SnapshotType,
    size_bytes: usize,
) -> Vec<String> {
    let at = timestamp.to_datetime();
    let mut tags = vec![
        format!("year:{}", at.format("%Y")),
        format!("month:{}", at.format("%Y-%m")),
        format!("day:{}", at.format("%Y-%m-%d")),
        format!("type:{}", snapshot_type.as_str()),
        format!("size:{}", size_class(size_bytes)),
    ];
    tags.extend(
        state
            .iter()
            .filter(|(_, value)| has_content(value))
            .map(|(name, _)| format!("has:{}", name)),
    );
    tags
}
