//! Presence information for the local client and every other participant

use crate::change::ChangeSet;
use crate::path::is_same_or_descendant;
use crate::selection::Selection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Roster entry for a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default)]
    pub client_color: Option<String>,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// Which field a client is focused on and what it has selected there
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessInfo {
    pub path: Option<String>,
    pub selection: Option<Selection>,
}

impl AwarenessInfo {
    pub fn new(path: impl Into<String>, selection: Option<Selection>) -> Self {
        Self {
            path: Some(path.into()),
            selection,
        }
    }

    fn is_at(&self, path: &str) -> bool {
        self.path.as_deref() == Some(path)
    }

    fn map(&mut self, path: &str, changes: &ChangeSet) -> bool {
        if !self.is_at(path) {
            return false;
        }
        match self.selection.take() {
            Some(selection) => {
                self.selection = selection.map(changes);
                true
            }
            None => false,
        }
    }

    fn invalidate_subtree(&mut self, path: &str) -> bool {
        let inside = self
            .path
            .as_deref()
            .is_some_and(|p| is_same_or_descendant(p, path));
        inside && self.selection.take().is_some()
    }
}

/// Awareness of the local client and of every other known client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Awareness {
    own: AwarenessInfo,
    others: BTreeMap<String, AwarenessInfo>,
}

impl Awareness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn own(&self) -> &AwarenessInfo {
        &self.own
    }

    pub fn set_own(&mut self, info: AwarenessInfo) {
        self.own = info;
    }

    pub fn others(&self) -> &BTreeMap<String, AwarenessInfo> {
        &self.others
    }

    pub fn other(&self, client_id: &str) -> Option<&AwarenessInfo> {
        self.others.get(client_id)
    }

    pub fn set_other(&mut self, client_id: impl Into<String>, info: AwarenessInfo) {
        self.others.insert(client_id.into(), info);
    }

    pub fn remove_other(&mut self, client_id: &str) -> Option<AwarenessInfo> {
        self.others.remove(client_id)
    }

    /// Forget everyone else and clear the own focus
    /// Back to self-only: other clients are forgotten, our own focus stays
    pub fn reset(&mut self) {
        self.others.clear();
    }

    /// Start tracking every client of a roster except ourselves, keeping
    /// what we already know about clients still present.
    pub fn seed<'a>(&mut self, clients: impl IntoIterator<Item = &'a ClientInfo>, self_id: Option<&str>) {
        let mut others = BTreeMap::new();
        for client in clients {
            if Some(client.client_id.as_str()) == self_id {
                continue;
            }
            let info = self.others.remove(&client.client_id).unwrap_or_default();
            others.insert(client.client_id.clone(), info);
        }
        self.others = others;
    }

    /// Rebase every selection focused on `path`. Returns true if any
    /// selection changed.
    pub fn map_path(&mut self, path: &str, changes: &ChangeSet) -> bool {
        let mut touched = self.own.map(path, changes);
        for info in self.others.values_mut() {
            touched |= info.map(path, changes);
        }
        touched
    }

    /// Rebase only the other clients' selections focused on `path`
    pub fn map_others(&mut self, path: &str, changes: &ChangeSet) -> bool {
        let mut touched = false;
        for info in self.others.values_mut() {
            touched |= info.map(path, changes);
        }
        touched
    }

    /// Drop selections focused at or below `path`
    pub fn invalidate_subtree(&mut self, path: &str) -> bool {
        let mut touched = self.own.invalidate_subtree(path);
        for info in self.others.values_mut() {
            touched |= info.invalidate_subtree(path);
        }
        touched
    }
}
