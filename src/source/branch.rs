//! Branch cache for sites that group chapters into alternate translations.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// One alternate version (translation team, edition) of an item's chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub is_default: bool,
}

impl Branch {
    #[must_use]
    pub fn new(id: impl Into<String>, is_default: bool) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_default,
        }
    }
}

/// Item locator → branch list.
///
/// Entries never expire; a later detail fetch for the same locator replaces
/// the earlier list.
#[derive(Debug, Default)]
pub struct BranchCache {
    entries: DashMap<String, Arc<Vec<Branch>>>,
}

impl BranchCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: &str, branches: Vec<Branch>) {
        debug!(locator, count = branches.len(), "caching branches");
        self.entries.insert(locator.to_string(), Arc::new(branches));
    }

    #[must_use]
    pub fn get(&self, locator: &str) -> Option<Arc<Vec<Branch>>> {
        self.entries.get(locator).map(|entry| Arc::clone(entry.value()))
    }

    /// The branch flagged as default, else the first one.
    #[must_use]
    pub fn default_branch(&self, locator: &str) -> Option<Branch> {
        let branches = self.get(locator)?;
        branches
            .iter()
            .find(|b| b.is_default)
            .or_else(|| branches.first())
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_branch_prefers_flag() {
        let cache = BranchCache::new();
        cache.insert("12", vec![Branch::new("a", false), Branch::new("b", true)]);
        assert_eq!(cache.default_branch("12").map(|b| b.id), Some("b".to_string()));
    }

    #[test]
    fn test_default_branch_falls_back_to_first() {
        let cache = BranchCache::new();
        cache.insert("12", vec![Branch::new("a", false), Branch::new("b", false)]);
        assert_eq!(cache.default_branch("12").map(|b| b.id), Some("a".to_string()));
        assert!(cache.default_branch("missing").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = BranchCache::new();
        cache.insert("12", vec![Branch::new("a", true)]);
        cache.insert("12", vec![Branch::new("z", true)]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.default_branch("12").map(|b| b.id), Some("z".to_string()));
    }
}
