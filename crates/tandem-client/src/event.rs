//! Events flowing into and out of a session

use std::collections::BTreeMap;

use serde_json::Value;
use tandem_core::{AwarenessInfo, ChangeSet, ClientInfo, Comment, Selection, SortEntry};
use tandem_protocol::Permissions;
use tandem_transport::{ConnectionError, ConnectionState};

/// A local edit or focus change reported by the editor
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    /// Overwrite the value at `path`
    UpdateKey {
        path: String,
        value: Value,
        update_awareness: bool,
    },
    /// An edit of the text at `path`, with the selection after it
    UpdateText {
        path: String,
        changes: ChangeSet,
        selection: Option<Selection>,
    },
    Create {
        path: String,
        value: Value,
    },
    Delete {
        path: String,
    },
    Sort {
        path: String,
        sort: Vec<SortEntry>,
    },
    /// Focus moved or the selection changed
    Awareness {
        path: Option<String>,
        selection: Option<Selection>,
    },
}

impl LocalEvent {
    pub fn path(&self) -> Option<&str> {
        match self {
            LocalEvent::UpdateKey { path, .. }
            | LocalEvent::UpdateText { path, .. }
            | LocalEvent::Create { path, .. }
            | LocalEvent::Delete { path }
            | LocalEvent::Sort { path, .. } => Some(path),
            LocalEvent::Awareness { path, .. } => path.as_deref(),
        }
    }
}

/// Notification published to subscribers of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A fresh initial state replaced the session
    Initialized { version: u64 },
    /// The value at `path` changed
    ValueChanged { path: String },
    /// A net remote change is about to be applied to the text at `path`
    RemoteText { path: String, changes: ChangeSet },
    AwarenessChanged,
    ClientsChanged,
    CommentsChanged,
    ConnectionChanged {
        state: ConnectionState,
        error: Option<ConnectionError>,
    },
}

/// Point-in-time copy of everything a session holds
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub document: Value,
    pub version: u64,
    pub client_id: Option<String>,
    pub permissions: Permissions,
    pub clients: Vec<ClientInfo>,
    pub awareness: AwarenessInfo,
    pub others: BTreeMap<String, AwarenessInfo>,
    pub comments: Vec<Comment>,
    pub connection: ConnectionState,
    pub error: Option<ConnectionError>,
}
