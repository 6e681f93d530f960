//! Session state and the inbound event dispatcher
//!
//! A `Session` is everything one connection knows: the document, the server
//! version, the roster, presence, comments and the queues of local text
//! changes the server has not confirmed yet. It is synchronous; the
//! `CollabClient` owns it behind a mutex and decides when things are sent.

use serde_json::Value;
use tandem_core::{
    rebase, AwarenessInfo, ChangeSet, ClientInfo, Comment, CommentPatch, CommentStore, Document,
    Incoming, PathStore, Selection,
};
use tandem_core::Awareness as AwarenessStore;
use tandem_protocol::{
    Awareness, Connect, Create, Delete, Disconnect, Init, Message, Permissions, PollRequest, Sort,
    UpdateKey, UpdateText,
};
use tandem_transport::{ConnectionError, ConnectionState};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::ClientResult;
use crate::event::{SessionEvent, SessionSnapshot};

/// What the client has to do after an inbound message was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    Nothing,
    /// Announce our own awareness right away
    SendAwareness,
    /// A relayed write replaced the subtree at `path`
    Overwritten { path: String },
}

pub struct Session {
    document: Document,
    version: u64,
    client_id: Option<String>,
    permissions: Permissions,
    read_only: bool,
    clients: Vec<ClientInfo>,
    awareness: AwarenessStore,
    paths: PathStore,
    comments: CommentStore,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create an empty session. With `read_only` the session never gains
    /// write permission, whatever the server grants.
    pub fn new(events: broadcast::Sender<SessionEvent>, read_only: bool) -> Self {
        Self {
            document: Document::new(),
            version: 0,
            client_id: None,
            permissions: Permissions::default(),
            read_only,
            clients: Vec::new(),
            awareness: AwarenessStore::new(),
            paths: PathStore::new(),
            comments: CommentStore::new(),
            events,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn can_write(&self) -> bool {
        self.permissions.write
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        self.document.get(path)
    }

    pub fn clients(&self) -> &[ClientInfo] {
        &self.clients
    }

    pub fn awareness(&self) -> &AwarenessStore {
        &self.awareness
    }

    pub fn comments(&self) -> &[Comment] {
        self.comments.all()
    }

    pub fn unconfirmed(&self, path: &str) -> &[ChangeSet] {
        self.paths.unconfirmed(path)
    }

    /// Returns true if our own focus is on `path`
    pub fn is_focused(&self, path: &str) -> bool {
        self.awareness.own().path.as_deref() == Some(path)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_own(&self, client_id: Option<&str>) -> bool {
        client_id.is_some() && client_id == self.client_id.as_deref()
    }

    fn advance(&mut self, version: Option<u64>) {
        if let Some(version) = version {
            if version > self.version {
                self.version = version;
            }
        }
    }

    /// Apply an inbound message
    pub fn receive(&mut self, message: &Message) -> ClientResult<Followup> {
        let followup = match message {
            Message::Init(init) => {
                self.initialize(init);
                return Ok(if self.permissions.write {
                    Followup::SendAwareness
                } else {
                    Followup::Nothing
                });
            }
            _ if !self.permissions.read => {
                trace!(kind = message.kind(), "No read permission, ignoring message");
                return Ok(Followup::Nothing);
            }
            Message::UpdateKey(update) => self.remote_update_key(update)?,
            Message::UpdateText(update) => {
                self.remote_update_text(update)?;
                Followup::Nothing
            }
            Message::Create(create) => {
                self.remote_create(create)?;
                Followup::Nothing
            }
            Message::Delete(delete) => {
                self.remote_delete(delete)?;
                Followup::Overwritten {
                    path: delete.path.clone(),
                }
            }
            Message::Sort(sort) => {
                self.remote_sort(sort)?;
                Followup::Nothing
            }
            Message::Connect(connect) => self.remote_connect(connect),
            Message::Disconnect(disconnect) => {
                self.remote_disconnect(disconnect);
                Followup::Nothing
            }
            Message::Awareness(awareness) => {
                self.remote_awareness(awareness);
                Followup::Nothing
            }
            Message::Ping {} => Followup::Nothing,
            Message::Error { message } => {
                warn!(message = %message, "Server reported an error");
                Followup::Nothing
            }
        };
        self.advance(message.version());
        Ok(followup)
    }

    fn initialize(&mut self, init: &Init) {
        self.document = Document::from_value(init.data.clone());
        self.version = init.version;
        self.client_id = Some(init.client_id.clone());
        self.permissions = init.permissions;
        if self.read_only {
            self.permissions.write = false;
        }
        self.clients = init.clients.clone();
        self.awareness.reset();
        self.revalidate_focus();
        self.awareness.seed(&self.clients, self.client_id.as_deref());
        self.paths.clear();
        self.comments.replace_all(init.comments.clone());

        info!(
            version = init.version,
            client_id = %init.client_id,
            clients = self.clients.len(),
            write = self.permissions.write,
            "Session initialized"
        );
        self.emit(SessionEvent::Initialized {
            version: init.version,
        });
    }

    /// Our focus survives a reconnect; its selection only if it still fits
    /// the text the initial state brought
    fn revalidate_focus(&mut self) {
        let own = self.awareness.own();
        let Some(path) = own.path.clone() else {
            return;
        };
        if self.document.get(&path).is_none() {
            self.awareness.set_own(AwarenessInfo::default());
            return;
        }
        let fits = match (&own.selection, self.document.text(&path)) {
            (None, _) => true,
            (Some(selection), Ok(text)) => selection.fits(text.chars().count()),
            (Some(_), Err(_)) => false,
        };
        if !fits {
            self.awareness.set_own(AwarenessInfo::new(path, None));
        }
    }

    fn remote_update_key(&mut self, update: &UpdateKey) -> ClientResult<Followup> {
        if self.is_own(update.client_id.as_deref()) {
            trace!(path = %update.path, "Ignoring echo of own key update");
            return Ok(Followup::Nothing);
        }
        self.document.set(&update.path, update.value.clone())?;
        self.overwritten(&update.path);
        self.emit(SessionEvent::ValueChanged {
            path: update.path.clone(),
        });
        Ok(Followup::Overwritten {
            path: update.path.clone(),
        })
    }

    /// Forget everything local below a path whose value was replaced
    fn overwritten(&mut self, path: &str) {
        self.paths.clear_subtree(path);
        if self.awareness.invalidate_subtree(path) {
            self.emit(SessionEvent::AwarenessChanged);
        }
        if self.comments.unanchor_subtree(path) {
            self.emit(SessionEvent::CommentsChanged);
        }
    }

    fn remote_update_text(&mut self, update: &UpdateText) -> ClientResult<()> {
        let path = update.path.as_str();
        let own_id = self.client_id.clone();
        let incoming = update.updates.iter().enumerate().map(|(idx, entry)| Incoming {
            changes: &entry.changes,
            own: own_id
                .as_deref()
                .is_some_and(|id| update.is_authored_by(idx, id)),
        });
        let rebased = rebase(self.paths.unconfirmed(path), incoming)?;

        // Everything is computed before the session is touched
        let text = match &rebased.remote {
            Some(remote) => Some(remote.apply(self.document.text(path)?)?),
            None => None,
        };
        let len = match &text {
            Some(text) => text.chars().count(),
            None => self
                .document
                .text(path)
                .map(|text| text.chars().count())
                .unwrap_or(0),
        };

        // Piggybacked state is in server coordinates; our remaining
        // changes move it onto the local text
        let selection = match (&update.selection, update.client_id.as_deref()) {
            (Some(selection), Some(author)) if !self.is_own(Some(author)) => Some((
                author.to_string(),
                selection
                    .map_all(&rebased.unconfirmed)
                    .filter(|selection| selection.fits(len)),
            )),
            _ => None,
        };
        let patches: Vec<CommentPatch> = update
            .comments
            .iter()
            .cloned()
            .map(|mut patch| {
                if let Some(Some(range)) = patch.text_range {
                    patch.text_range = Some(
                        rebased
                            .unconfirmed
                            .iter()
                            .try_fold(range, |range, changes| range.map(changes)),
                    );
                }
                patch
            })
            .collect();

        if rebased.confirmed > 0 {
            debug!(
                path,
                confirmed = rebased.confirmed,
                remaining = rebased.unconfirmed.len(),
                "Local changes confirmed"
            );
        }
        self.paths.ensure(path).unconfirmed = rebased.unconfirmed;

        let mut awareness_changed = false;
        let mut comments_changed = false;
        if let (Some(remote), Some(text)) = (rebased.remote, text) {
            self.emit(SessionEvent::RemoteText {
                path: path.to_string(),
                changes: remote.clone(),
            });
            self.document.set_text(path, text)?;
            awareness_changed |= self.awareness.map_path(path, &remote);
            comments_changed |= self.comments.map_path(path, &remote);
            self.emit(SessionEvent::ValueChanged {
                path: path.to_string(),
            });
        }

        if let Some((author, selection)) = selection {
            self.awareness
                .set_other(author, AwarenessInfo::new(path, selection));
            awareness_changed = true;
        }
        comments_changed |= self.comments.apply_patches(&patches);

        if awareness_changed {
            self.emit(SessionEvent::AwarenessChanged);
        }
        if comments_changed {
            self.emit(SessionEvent::CommentsChanged);
        }
        Ok(())
    }

    fn remote_create(&mut self, create: &Create) -> ClientResult<()> {
        self.document.create(&create.path, create.value.clone())?;
        self.emit(SessionEvent::ValueChanged {
            path: create.path.clone(),
        });
        Ok(())
    }

    fn remote_delete(&mut self, delete: &Delete) -> ClientResult<()> {
        self.document.delete(&delete.path)?;
        self.overwritten(&delete.path);
        self.emit(SessionEvent::ValueChanged {
            path: delete.path.clone(),
        });
        Ok(())
    }

    fn remote_sort(&mut self, sort: &Sort) -> ClientResult<()> {
        self.document.sort(&sort.path, &sort.sort)?;
        self.emit(SessionEvent::ValueChanged {
            path: sort.path.clone(),
        });
        Ok(())
    }

    fn remote_connect(&mut self, connect: &Connect) -> Followup {
        let client = &connect.client;
        if self.is_own(Some(&client.client_id)) {
            return Followup::Nothing;
        }
        match self
            .clients
            .iter_mut()
            .find(|c| c.client_id == client.client_id)
        {
            Some(existing) => *existing = client.clone(),
            None => self.clients.push(client.clone()),
        }
        if self.awareness.other(&client.client_id).is_none() {
            self.awareness
                .set_other(client.client_id.clone(), AwarenessInfo::default());
        }
        debug!(client_id = %client.client_id, "Client joined");
        self.emit(SessionEvent::ClientsChanged);

        if self.permissions.write {
            Followup::SendAwareness
        } else {
            Followup::Nothing
        }
    }

    fn remote_disconnect(&mut self, disconnect: &Disconnect) {
        self.clients.retain(|c| c.client_id != disconnect.client_id);
        self.awareness.remove_other(&disconnect.client_id);
        debug!(client_id = %disconnect.client_id, "Client left");
        self.emit(SessionEvent::ClientsChanged);
        self.emit(SessionEvent::AwarenessChanged);
    }

    fn remote_awareness(&mut self, awareness: &Awareness) {
        let Some(author) = awareness.client_id.as_deref() else {
            return;
        };
        if self.is_own(Some(author)) {
            return;
        }
        let selection = match (&awareness.path, &awareness.selection) {
            (Some(path), Some(selection)) => self
                .document
                .text(path)
                .ok()
                .map(|text| text.chars().count())
                .and_then(|len| {
                    selection
                        .map_all(self.paths.unconfirmed(path))
                        .filter(|selection| selection.fits(len))
                }),
            _ => None,
        };
        self.awareness.set_other(
            author,
            AwarenessInfo {
                path: awareness.path.clone(),
                selection,
            },
        );
        self.emit(SessionEvent::AwarenessChanged);
    }

    /// Overwrite a value locally
    pub fn update_key(&mut self, path: &str, value: Value) -> ClientResult<()> {
        self.document.set(path, value)?;
        self.overwritten(path);
        self.emit(SessionEvent::ValueChanged {
            path: path.to_string(),
        });
        Ok(())
    }

    /// Apply a local text edit and queue it until the server confirms it
    pub fn update_text(
        &mut self,
        path: &str,
        changes: ChangeSet,
        selection: Option<Selection>,
    ) -> ClientResult<()> {
        let text = changes.apply(self.document.text(path)?)?;
        let len = text.chars().count();
        self.document.set_text(path, text)?;

        match selection {
            Some(selection) => {
                self.awareness.map_others(path, &changes);
                let selection = selection.fits(len).then_some(selection);
                self.awareness
                    .set_own(AwarenessInfo::new(path, selection));
            }
            None => {
                self.awareness.map_path(path, &changes);
            }
        }
        if self.comments.map_path(path, &changes) {
            self.emit(SessionEvent::CommentsChanged);
        }
        self.paths.ensure(path).unconfirmed.push(changes);

        self.emit(SessionEvent::ValueChanged {
            path: path.to_string(),
        });
        self.emit(SessionEvent::AwarenessChanged);
        Ok(())
    }

    pub fn set_focus(&mut self, path: Option<String>, selection: Option<Selection>) {
        self.awareness.set_own(AwarenessInfo { path, selection });
        self.emit(SessionEvent::AwarenessChanged);
    }

    pub fn set_comments(&mut self, comments: Vec<Comment>) {
        self.comments.replace_all(comments);
        self.emit(SessionEvent::CommentsChanged);
    }

    pub fn upsert_comment(&mut self, comment: Comment) {
        self.comments.upsert(comment);
        self.emit(SessionEvent::CommentsChanged);
    }

    pub fn remove_comment(&mut self, id: &str) -> Option<Comment> {
        let removed = self.comments.remove(id);
        if removed.is_some() {
            self.emit(SessionEvent::CommentsChanged);
        }
        removed
    }

    /// Replace the roster wholesale
    pub fn replace_roster(&mut self, clients: Vec<ClientInfo>) {
        self.awareness.seed(&clients, self.client_id.as_deref());
        self.clients = clients;
        self.emit(SessionEvent::ClientsChanged);
    }

    /// The key update for `path`, carrying the value currently there
    pub fn key_update_message(&self, path: &str, update_awareness: bool) -> Option<Message> {
        self.document
            .get(path)
            .cloned()
            .map(|value| Message::update_key(path, value, update_awareness))
    }

    /// The text update for `path`, carrying its whole unconfirmed queue.
    /// `None` if nothing is queued.
    pub fn text_update_message(&self, path: &str, attach_selection: bool) -> Option<Message> {
        let queue = self.paths.unconfirmed(path);
        if queue.is_empty() {
            return None;
        }
        let selection = if attach_selection && self.is_focused(path) {
            self.awareness.own().selection.clone()
        } else {
            None
        };
        Some(Message::update_text(path, queue.iter().cloned(), selection))
    }

    pub fn awareness_message(&self) -> Message {
        let own = self.awareness.own();
        Message::awareness(own.path.clone(), own.selection.clone())
    }

    /// All unconfirmed changes as one batch, if there are any
    pub fn unconfirmed_batch(&self) -> Option<PollRequest> {
        if !self.paths.has_pending() {
            return None;
        }
        let messages = self
            .paths
            .pending()
            .map(|(path, queue)| Message::update_text(path, queue.iter().cloned(), None))
            .collect();
        Some(PollRequest::new(self.version, self.client_id.clone(), messages))
    }

    /// Prepare for a new connection. The document stays readable until the
    /// next initial state replaces it.
    pub fn reset(&mut self) {
        self.version = 0;
        self.client_id = None;
        self.permissions = Permissions::default();
        self.clients.clear();
        self.awareness.reset();
        self.paths.clear();
    }

    pub fn snapshot(
        &self,
        connection: ConnectionState,
        error: Option<ConnectionError>,
    ) -> SessionSnapshot {
        SessionSnapshot {
            document: self.document.as_value().clone(),
            version: self.version,
            client_id: self.client_id.clone(),
            permissions: self.permissions,
            clients: self.clients.clone(),
            awareness: self.awareness.own().clone(),
            others: self.awareness.others().clone(),
            comments: self.comments.all().to_vec(),
            connection,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_core::TextRange;
    use tandem_protocol::TextUpdate;

    fn session() -> (Session, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (Session::new(tx, false), rx)
    }

    fn init(data: Value, permissions: Permissions) -> Message {
        Message::Init(Init {
            version: 1,
            client_id: "me".into(),
            data,
            clients: vec![client("me"), client("other")],
            permissions,
            comments: Vec::new(),
        })
    }

    fn client(id: &str) -> ClientInfo {
        ClientInfo {
            client_id: id.into(),
            client_color: None,
            user: Value::Null,
        }
    }

    fn text_update(path: &str, author: &str, changes: ChangeSet, version: u64) -> Message {
        Message::UpdateText(UpdateText {
            path: path.into(),
            updates: vec![TextUpdate {
                changes,
                client_id: Some(author.into()),
            }],
            selection: None,
            comments: Vec::new(),
            version: Some(version),
            client_id: Some(author.into()),
        })
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_init_replaces_state() {
        let (mut session, _rx) = session();
        let followup = session
            .receive(&init(json!({"a": "x"}), Permissions::read_write()))
            .unwrap();
        assert_eq!(followup, Followup::SendAwareness);
        assert_eq!(session.version(), 1);
        assert_eq!(session.client_id(), Some("me"));
        assert_eq!(session.value("a"), Some(&json!("x")));
        assert_eq!(session.awareness().others().len(), 1);
        assert!(session.awareness().other("other").is_some());
    }

    #[test]
    fn test_forced_read_only() {
        let (tx, _rx) = broadcast::channel(4);
        let mut session = Session::new(tx, true);
        let followup = session
            .receive(&init(json!({}), Permissions::read_write()))
            .unwrap();
        assert_eq!(followup, Followup::Nothing);
        assert!(!session.can_write());
    }

    #[test]
    fn test_concurrent_insert_scenario() {
        let (mut session, mut rx) = session();
        session
            .receive(&init(json!({"t": "ABCD"}), Permissions::read_write()))
            .unwrap();

        let local = ChangeSet::insert_at(4, 4, "E").unwrap();
        session
            .update_text("t", local.clone(), Some(Selection::cursor(5)))
            .unwrap();
        assert_eq!(session.document().text("t").unwrap(), "ABCDE");
        drain(&mut rx);

        let remote = ChangeSet::insert_at(4, 0, "0").unwrap();
        session
            .receive(&text_update("t", "other", remote.clone(), 2))
            .unwrap();
        assert_eq!(session.document().text("t").unwrap(), "0ABCDE");
        assert_eq!(session.awareness().own().selection, Some(Selection::cursor(6)));
        assert_eq!(session.version(), 2);

        let events = drain(&mut rx);
        let remote_at = events
            .iter()
            .position(|e| matches!(e, SessionEvent::RemoteText { .. }))
            .unwrap();
        let changed_at = events
            .iter()
            .position(|e| matches!(e, SessionEvent::ValueChanged { .. }))
            .unwrap();
        assert!(remote_at < changed_at);

        // The queue was rebased onto the server text
        let queue = session.unconfirmed("t").to_vec();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].apply("0ABCD").unwrap(), "0ABCDE");

        session
            .receive(&text_update("t", "me", queue[0].clone(), 3))
            .unwrap();
        assert!(session.unconfirmed("t").is_empty());
        assert_eq!(session.document().text("t").unwrap(), "0ABCDE");
    }

    #[test]
    fn test_reads_need_permission() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"a": 1}), Permissions::default()))
            .unwrap();
        session
            .receive(&Message::update_key("a", json!(2), false))
            .unwrap();
        assert_eq!(session.value("a"), Some(&json!(1)));
    }

    #[test]
    fn test_foreign_key_update_invalidates_subtree() {
        let (mut session, _rx) = session();
        session
            .receive(&init(
                json!({"f": {"t": "abc"}}),
                Permissions::read_write(),
            ))
            .unwrap();
        session
            .update_text(
                "f.t",
                ChangeSet::insert_at(3, 3, "d").unwrap(),
                Some(Selection::cursor(4)),
            )
            .unwrap();
        session.upsert_comment(Comment {
            id: "c1".into(),
            path: "f.t".into(),
            text_range: Some(TextRange::new(0, 2)),
        });

        let mut update = Message::update_key("f", json!({"t": "new"}), false);
        if let Message::UpdateKey(m) = &mut update {
            m.client_id = Some("other".into());
            m.version = Some(4);
        }
        session.receive(&update).unwrap();

        assert_eq!(session.document().text("f.t").unwrap(), "new");
        assert!(session.unconfirmed("f.t").is_empty());
        assert_eq!(session.awareness().own().selection, None);
        assert_eq!(session.comments()[0].text_range, None);
    }

    #[test]
    fn test_own_key_update_echo_is_ignored() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"a": 1}), Permissions::read_write()))
            .unwrap();
        session.update_key("a", json!(3)).unwrap();

        let mut echo = Message::update_key("a", json!(2), false);
        if let Message::UpdateKey(m) = &mut echo {
            m.client_id = Some("me".into());
        }
        session.receive(&echo).unwrap();
        assert_eq!(session.value("a"), Some(&json!(3)));
    }

    #[test]
    fn test_remote_awareness_follows_unconfirmed_changes() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"t": "abc"}), Permissions::read_write()))
            .unwrap();
        session
            .update_text("t", ChangeSet::insert_at(3, 0, "xx").unwrap(), None)
            .unwrap();

        let awareness = Message::Awareness(Awareness {
            path: Some("t".into()),
            selection: Some(Selection::cursor(1)),
            version: None,
            client_id: Some("other".into()),
        });
        session.receive(&awareness).unwrap();
        let info = session.awareness().other("other").unwrap();
        assert_eq!(info.selection, Some(Selection::cursor(3)));

        // Outside the server text: dropped, never clamped
        let awareness = Message::Awareness(Awareness {
            path: Some("t".into()),
            selection: Some(Selection::cursor(9)),
            version: None,
            client_id: Some("other".into()),
        });
        session.receive(&awareness).unwrap();
        let info = session.awareness().other("other").unwrap();
        assert_eq!(info.path.as_deref(), Some("t"));
        assert_eq!(info.selection, None);
    }

    #[test]
    fn test_remote_delete_clears_subtree() {
        let (mut session, _rx) = session();
        session
            .receive(&init(
                json!({"list": [{"t": "a"}, {"t": "b"}]}),
                Permissions::read_write(),
            ))
            .unwrap();
        session
            .update_text("list.[1].t", ChangeSet::insert_at(1, 1, "!").unwrap(), None)
            .unwrap();

        let mut delete = Message::delete("list.[1]");
        if let Message::Delete(m) = &mut delete {
            m.client_id = Some("other".into());
        }
        session.receive(&delete).unwrap();
        assert_eq!(session.value("list"), Some(&json!([{"t": "a"}])));
        assert!(session.unconfirmed_batch().is_none());
    }

    #[test]
    fn test_foreign_overwrites_report_their_path() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"a": {"b": 1}, "c": 2}), Permissions::read_write()))
            .unwrap();

        let mut update = Message::update_key("a", json!({"b": 5}), false);
        if let Message::UpdateKey(m) = &mut update {
            m.client_id = Some("other".into());
        }
        assert_eq!(
            session.receive(&update).unwrap(),
            Followup::Overwritten { path: "a".into() }
        );

        // Our own echo changes nothing
        if let Message::UpdateKey(m) = &mut update {
            m.client_id = Some("me".into());
        }
        assert_eq!(session.receive(&update).unwrap(), Followup::Nothing);

        assert_eq!(
            session.receive(&Message::delete("c")).unwrap(),
            Followup::Overwritten { path: "c".into() }
        );
    }

    #[test]
    fn test_key_update_past_list_end_fails() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"list": ["a"]}), Permissions::read_write()))
            .unwrap();
        let mut update = Message::update_key(format!("list.[{}]", usize::MAX), json!("x"), false);
        if let Message::UpdateKey(m) = &mut update {
            m.client_id = Some("other".into());
            m.version = Some(2);
        }
        assert!(session.receive(&update).is_err());
        assert_eq!(session.value("list"), Some(&json!(["a"])));
        assert_eq!(session.version(), 1);
    }

    #[test]
    fn test_reinit_keeps_own_focus() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"t": "abcdef"}), Permissions::read_write()))
            .unwrap();
        session.set_focus(Some("t".into()), Some(Selection::cursor(5)));

        session.reset();
        assert_eq!(session.awareness().own().path.as_deref(), Some("t"));
        assert!(session.awareness().others().is_empty());

        // The text shrank while we were away
        session
            .receive(&init(json!({"t": "ab"}), Permissions::read_write()))
            .unwrap();
        let own = session.awareness().own();
        assert_eq!(own.path.as_deref(), Some("t"));
        assert_eq!(own.selection, None);
        assert!(session.awareness().other("other").is_some());

        session.set_focus(Some("t".into()), Some(Selection::cursor(1)));
        session
            .receive(&init(json!({"t": "abc"}), Permissions::read_write()))
            .unwrap();
        assert_eq!(session.awareness().own().selection, Some(Selection::cursor(1)));

        session
            .receive(&init(json!({}), Permissions::read_write()))
            .unwrap();
        assert_eq!(session.awareness().own().path, None);
    }

    #[test]
    fn test_version_never_regresses() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"a": 0}), Permissions::read_write()))
            .unwrap();
        let mut update = Message::update_key("a", json!(1), false);
        if let Message::UpdateKey(m) = &mut update {
            m.version = Some(5);
            m.client_id = Some("other".into());
        }
        session.receive(&update).unwrap();
        if let Message::UpdateKey(m) = &mut update {
            m.version = Some(3);
        }
        session.receive(&update).unwrap();
        assert_eq!(session.version(), 5);
    }

    #[test]
    fn test_connect_and_disconnect() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({}), Permissions::read_write()))
            .unwrap();
        let connect = Message::Connect(Connect {
            client: client("new"),
            version: None,
        });
        assert_eq!(session.receive(&connect).unwrap(), Followup::SendAwareness);
        assert_eq!(session.clients().len(), 3);

        let disconnect = Message::Disconnect(Disconnect {
            client_id: "new".into(),
            version: None,
        });
        session.receive(&disconnect).unwrap();
        assert_eq!(session.clients().len(), 2);
        assert!(session.awareness().other("new").is_none());
    }

    #[test]
    fn test_mismatched_update_leaves_text_untouched() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"t": "abc"}), Permissions::read_write()))
            .unwrap();
        let bogus = ChangeSet::insert_at(10, 0, "x").unwrap();
        assert!(session.receive(&text_update("t", "other", bogus, 2)).is_err());
        assert_eq!(session.document().text("t").unwrap(), "abc");
        assert_eq!(session.version(), 1);
    }

    #[test]
    fn test_unconfirmed_batch() {
        let (mut session, _rx) = session();
        session
            .receive(&init(json!({"t": "ab"}), Permissions::read_write()))
            .unwrap();
        assert!(session.unconfirmed_batch().is_none());

        session
            .update_text("t", ChangeSet::insert_at(2, 2, "c").unwrap(), None)
            .unwrap();
        session
            .update_text("t", ChangeSet::insert_at(3, 3, "d").unwrap(), None)
            .unwrap();
        let batch = session.unconfirmed_batch().unwrap();
        assert_eq!(batch.version, 1);
        assert_eq!(batch.client_id.as_deref(), Some("me"));
        match &batch.messages[..] {
            [Message::UpdateText(update)] => assert_eq!(update.updates.len(), 2),
            other => panic!("unexpected batch {:?}", other),
        }
    }
}
