//! History branches: independent entry sequences diverging from a parent entry.

use super::HistoryEntry;
use crate::error::{Result, StoreError};
use crate::types::{new_id, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Name (and id) of the branch every history starts with.
pub const MAIN_BRANCH: &str = "main";

/// A named sequence of history entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBranch {
    pub id: String,
    pub name: String,
    /// Entry this branch diverged from, possibly in another branch.
    pub parent_entry_id: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

impl HistoryBranch {
    fn new(id: String, name: String, parent_entry_id: Option<String>) -> Self {
        Self {
            id,
            name,
            parent_entry_id,
            created_at: Timestamp::now(),
            metadata: BTreeMap::new(),
            entries: Vec::new(),
        }
    }

    /// Position of an entry in this branch.
    pub fn position(&self, entry_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == entry_id)
    }
}

/// Summary of a branch without its entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub id: String,
    pub name: String,
    pub parent_entry_id: Option<String>,
    pub created_at: Timestamp,
    pub entry_count: usize,
    pub is_current: bool,
}

/// Branches by id, plus the name index.
#[derive(Clone, Debug)]
pub(crate) struct BranchSet {
    branches: BTreeMap<String, HistoryBranch>,
    name_to_id: HashMap<String, String>,
}

impl BranchSet {
    /// A set holding only an empty main branch.
    pub fn new() -> Self {
        let mut set = Self {
            branches: BTreeMap::new(),
            name_to_id: HashMap::new(),
        };
        set.insert(HistoryBranch::new(
            MAIN_BRANCH.to_string(),
            MAIN_BRANCH.to_string(),
            None,
        ));
        set
    }

    /// Rebuild from exported branches.
    pub fn from_branches(branches: BTreeMap<String, HistoryBranch>) -> Result<Self> {
        let mut set = Self {
            branches: BTreeMap::new(),
            name_to_id: HashMap::new(),
        };
        for (id, branch) in branches {
            if id != branch.id {
                return Err(StoreError::InvalidFormat(format!(
                    "branch keyed {} carries id {}",
                    id, branch.id
                )));
            }
            if set.name_to_id.contains_key(&branch.name) {
                return Err(StoreError::BranchExists(branch.name));
            }
            set.insert(branch);
        }
        if !set.branches.contains_key(MAIN_BRANCH) {
            return Err(StoreError::BranchNotFound(MAIN_BRANCH.to_string()));
        }
        Ok(set)
    }

    fn insert(&mut self, branch: HistoryBranch) {
        self.name_to_id.insert(branch.name.clone(), branch.id.clone());
        self.branches.insert(branch.id.clone(), branch);
    }

    /// Create an empty branch diverging from `parent_entry_id`.
    pub fn create(&mut self, name: &str, parent_entry_id: Option<String>) -> Result<String> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("branch name is empty".into()));
        }
        if self.name_to_id.contains_key(name) {
            return Err(StoreError::BranchExists(name.to_string()));
        }
        let id = new_id();
        self.insert(HistoryBranch::new(id.clone(), name.to_string(), parent_entry_id));
        Ok(id)
    }

    /// Resolve a branch id or name to its id.
    pub fn resolve(&self, id_or_name: &str) -> Result<String> {
        if self.branches.contains_key(id_or_name) {
            return Ok(id_or_name.to_string());
        }
        self.name_to_id
            .get(id_or_name)
            .cloned()
            .ok_or_else(|| StoreError::BranchNotFound(id_or_name.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&HistoryBranch> {
        self.branches.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut HistoryBranch> {
        self.branches.get_mut(id)
    }

    /// Remove a branch by id.
    pub fn remove(&mut self, id: &str) -> Option<HistoryBranch> {
        let branch = self.branches.remove(id)?;
        self.name_to_id.remove(&branch.name);
        Some(branch)
    }

    /// Find an entry anywhere, returning the branch id and position.
    pub fn locate(&self, entry_id: &str) -> Option<(&str, usize)> {
        self.branches
            .values()
            .find_map(|b| b.position(entry_id).map(|i| (b.id.as_str(), i)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryBranch> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn to_map(&self) -> BTreeMap<String, HistoryBranch> {
        self.branches.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_branch_exists() {
        let set = BranchSet::new();
        assert_eq!(set.len(), 1);
        assert_eq!(set.resolve(MAIN_BRANCH).unwrap(), MAIN_BRANCH);
    }

    #[test]
    fn test_create_and_resolve_by_name() {
        let mut set = BranchSet::new();
        let id = set.create("feature", None).unwrap();

        assert_eq!(set.resolve("feature").unwrap(), id);
        assert_eq!(set.resolve(&id).unwrap(), id);
        assert!(matches!(
            set.create("feature", None),
            Err(StoreError::BranchExists(_))
        ));
        assert!(matches!(
            set.resolve("missing"),
            Err(StoreError::BranchNotFound(_))
        ));
    }

    #[test]
    fn test_remove_frees_name() {
        let mut set = BranchSet::new();
        let id = set.create("tmp", None).unwrap();
        assert!(set.remove(&id).is_some());
        assert!(set.resolve("tmp").is_err());
        set.create("tmp", None).unwrap();
    }
}
