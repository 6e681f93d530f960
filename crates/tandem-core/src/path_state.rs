//! Per-path queues of unconfirmed local changes

use crate::change::ChangeSet;
use crate::path::is_same_or_descendant;
use std::collections::BTreeMap;

/// Bookkeeping for a single path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathState {
    /// Changes applied locally that the server has not echoed back yet,
    /// in local application order
    pub unconfirmed: Vec<ChangeSet>,
}

/// Unconfirmed change queues keyed by path
#[derive(Debug, Clone, Default)]
pub struct PathStore {
    paths: BTreeMap<String, PathState>,
}

impl PathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state for a path, creating it if absent
    pub fn ensure(&mut self, path: &str) -> &mut PathState {
        self.paths.entry(path.to_string()).or_default()
    }

    pub fn get(&self, path: &str) -> Option<&PathState> {
        self.paths.get(path)
    }

    /// The unconfirmed queue for a path; empty if none was recorded
    pub fn unconfirmed(&self, path: &str) -> &[ChangeSet] {
        self.paths
            .get(path)
            .map(|state| state.unconfirmed.as_slice())
            .unwrap_or(&[])
    }

    /// Empty the queues of `path` and every path below it
    pub fn clear_subtree(&mut self, path: &str) {
        self.paths
            .retain(|p, _| !is_same_or_descendant(p, path));
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Paths with at least one unconfirmed change, in path order
    pub fn pending(&self) -> impl Iterator<Item = (&str, &[ChangeSet])> {
        self.paths
            .iter()
            .filter(|(_, state)| !state.unconfirmed.is_empty())
            .map(|(path, state)| (path.as_str(), state.unconfirmed.as_slice()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending().next().is_some()
    }
}
