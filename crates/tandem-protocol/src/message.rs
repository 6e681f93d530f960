//! Tandem wire messages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_core::{ChangeSet, ClientInfo, Comment, CommentPatch, Selection, SortEntry};

/// What the server allows this client to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

impl Permissions {
    pub fn read_write() -> Self {
        Self { read: true, write: true }
    }

    pub fn read_only() -> Self {
        Self { read: true, write: false }
    }
}

/// One event on the wire, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Full session state sent once per connection
    #[serde(rename = "collab.init")]
    Init(Init),

    /// Overwrite the value at a path
    #[serde(rename = "collab.update_key")]
    UpdateKey(UpdateKey),

    /// Text edits at a path, in server order
    #[serde(rename = "collab.update_text")]
    UpdateText(UpdateText),

    /// Insert a list or map entry
    #[serde(rename = "collab.create")]
    Create(Create),

    /// Remove a list or map entry
    #[serde(rename = "collab.delete")]
    Delete(Delete),

    /// Reorder entries below a path
    #[serde(rename = "collab.sort")]
    Sort(Sort),

    /// A client joined
    #[serde(rename = "collab.connect")]
    Connect(Connect),

    /// A client left
    #[serde(rename = "collab.disconnect")]
    Disconnect(Disconnect),

    /// Focus and selection of a client
    #[serde(rename = "collab.awareness")]
    Awareness(Awareness),

    #[serde(rename = "ping")]
    Ping {},

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    #[serde(default)]
    pub version: u64,
    pub client_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub clients: Vec<ClientInfo>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateKey {
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub update_awareness: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// A single change set within an update-text batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUpdate {
    pub changes: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl TextUpdate {
    pub fn new(changes: ChangeSet) -> Self {
        Self {
            changes,
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateText {
    pub path: String,
    pub updates: Vec<TextUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<CommentPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl UpdateText {
    /// Returns true if the update at `idx` was authored by `client_id`.
    /// Updates without their own author inherit the message's.
    pub fn is_authored_by(&self, idx: usize, client_id: &str) -> bool {
        self.updates
            .get(idx)
            .and_then(|update| update.client_id.as_deref().or(self.client_id.as_deref()))
            == Some(client_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Create {
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub path: String,
    pub sort: Vec<SortEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connect {
    pub client: ClientInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Awareness {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub selection: Option<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Message {
    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init(_) => "collab.init",
            Message::UpdateKey(_) => "collab.update_key",
            Message::UpdateText(_) => "collab.update_text",
            Message::Create(_) => "collab.create",
            Message::Delete(_) => "collab.delete",
            Message::Sort(_) => "collab.sort",
            Message::Connect(_) => "collab.connect",
            Message::Disconnect(_) => "collab.disconnect",
            Message::Awareness(_) => "collab.awareness",
            Message::Ping {} => "ping",
            Message::Error { .. } => "error",
        }
    }

    /// Server version carried by the message, if any
    pub fn version(&self) -> Option<u64> {
        match self {
            Message::Init(m) => Some(m.version),
            Message::UpdateKey(m) => m.version,
            Message::UpdateText(m) => m.version,
            Message::Create(m) => m.version,
            Message::Delete(m) => m.version,
            Message::Sort(m) => m.version,
            Message::Connect(m) => m.version,
            Message::Disconnect(m) => m.version,
            Message::Awareness(m) => m.version,
            Message::Ping {} | Message::Error { .. } => None,
        }
    }

    /// Client that authored the message, if known
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Message::Init(m) => Some(&m.client_id),
            Message::UpdateKey(m) => m.client_id.as_deref(),
            Message::UpdateText(m) => m.client_id.as_deref(),
            Message::Create(m) => m.client_id.as_deref(),
            Message::Delete(m) => m.client_id.as_deref(),
            Message::Sort(m) => m.client_id.as_deref(),
            Message::Connect(m) => Some(&m.client.client_id),
            Message::Disconnect(m) => Some(&m.client_id),
            Message::Awareness(m) => m.client_id.as_deref(),
            Message::Ping {} | Message::Error { .. } => None,
        }
    }

    /// The document path the message targets
    pub fn path(&self) -> Option<&str> {
        match self {
            Message::UpdateKey(m) => Some(&m.path),
            Message::UpdateText(m) => Some(&m.path),
            Message::Create(m) => Some(&m.path),
            Message::Delete(m) => Some(&m.path),
            Message::Sort(m) => Some(&m.path),
            Message::Awareness(m) => m.path.as_deref(),
            _ => None,
        }
    }

    pub fn ping() -> Self {
        Message::Ping {}
    }

    pub fn update_key(path: impl Into<String>, value: Value, update_awareness: bool) -> Self {
        Message::UpdateKey(UpdateKey {
            path: path.into(),
            value,
            update_awareness,
            version: None,
            client_id: None,
        })
    }

    pub fn update_text(
        path: impl Into<String>,
        changes: impl IntoIterator<Item = ChangeSet>,
        selection: Option<Selection>,
    ) -> Self {
        Message::UpdateText(UpdateText {
            path: path.into(),
            updates: changes.into_iter().map(TextUpdate::new).collect(),
            selection,
            comments: Vec::new(),
            version: None,
            client_id: None,
        })
    }

    pub fn create(path: impl Into<String>, value: Value) -> Self {
        Message::Create(Create {
            path: path.into(),
            value,
            version: None,
            client_id: None,
        })
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Message::Delete(Delete {
            path: path.into(),
            version: None,
            client_id: None,
        })
    }

    pub fn sort(path: impl Into<String>, sort: Vec<SortEntry>) -> Self {
        Message::Sort(Sort {
            path: path.into(),
            sort,
            version: None,
            client_id: None,
        })
    }

    pub fn awareness(path: Option<String>, selection: Option<Selection>) -> Self {
        Message::Awareness(Awareness {
            path,
            selection,
            version: None,
            client_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_from_wire() {
        let msg: Message = serde_json::from_value(json!({
            "type": "collab.init",
            "version": 7,
            "client_id": "c1",
            "data": {"title": "Report"},
            "clients": [{"client_id": "c1"}, {"client_id": "c2", "client_color": "#f00"}],
            "permissions": {"read": true, "write": false},
        }))
        .unwrap();

        let Message::Init(init) = &msg else {
            panic!("expected init, got {:?}", msg);
        };
        assert_eq!(init.version, 7);
        assert_eq!(init.clients.len(), 2);
        assert_eq!(init.permissions, Permissions::read_only());
        assert!(init.comments.is_empty());
        assert_eq!(msg.version(), Some(7));
    }

    #[test]
    fn test_update_text_wire_shape() {
        let changes = ChangeSet::insert_at(4, 4, "E").unwrap();
        let msg = Message::update_text("f.title", [changes], Some(Selection::cursor(5)));
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "collab.update_text",
                "path": "f.title",
                "updates": [{"changes": [4, [0, "E"]]}],
                "selection": {"ranges": [{"anchor": 5, "head": 5}], "main": 0},
            })
        );
    }

    #[test]
    fn test_update_author_falls_back_to_message() {
        let msg: Message = serde_json::from_value(json!({
            "type": "collab.update_text",
            "path": "t",
            "version": 3,
            "client_id": "me",
            "updates": [
                {"changes": [[0, "a"]]},
                {"changes": [1, [0, "b"]], "client_id": "other"},
            ],
        }))
        .unwrap();

        let Message::UpdateText(update) = msg else {
            panic!("expected update_text");
        };
        assert!(update.is_authored_by(0, "me"));
        assert!(!update.is_authored_by(1, "me"));
        assert!(!update.is_authored_by(2, "me"));
    }

    #[test]
    fn test_ping_and_error() {
        assert_eq!(
            serde_json::to_value(Message::ping()).unwrap(),
            json!({"type": "ping"})
        );
        let msg: Message =
            serde_json::from_value(json!({"type": "error", "message": "nope"})).unwrap();
        assert_eq!(msg, Message::Error { message: "nope".into() });
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_value::<Message>(json!({"type": "collab.explode"})).is_err());
    }

    #[test]
    fn test_sort_shape() {
        let msg = Message::sort("findings", vec![SortEntry { id: "a".into(), order: 2 }]);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "collab.sort", "path": "findings", "sort": [{"id": "a", "order": 2}]})
        );
        assert_eq!(msg.path(), Some("findings"));
    }
}
