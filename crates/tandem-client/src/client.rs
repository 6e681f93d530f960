//! The collaboration client
//!
//! `CollabClient` owns one `Session` and at most one transport. Local events
//! mutate the session right away and are sent through the throttle
//! scheduler; inbound messages arrive through a `SessionHandler` that only
//! holds a weak handle and the generation of the transport it belongs to.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tandem_core::{ChangeSet, ClientInfo, Comment, Selection, SortEntry};
use tandem_protocol::Message;
use tandem_transport::{
    ConnectionError, ConnectionResult, ConnectionState, Transport, TransportHandler, TransportKind,
};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::connector::{Connector, HttpConnector};
use crate::error::{ClientError, ClientResult};
use crate::event::{LocalEvent, SessionEvent, SessionSnapshot};
use crate::session::{Followup, Session};
use crate::throttle::{Decision, Edge, Scheduler, ThrottleKey};

const EVENT_CAPACITY: usize = 256;

/// Real-time collaboration client for one document session
#[derive(Clone)]
pub struct CollabClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<SessionEvent>,
    weak: Weak<Inner>,
    state: Mutex<State>,
}

struct State {
    session: Session,
    scheduler: Scheduler,
    /// Last `update_awareness` flag per path, used by trailing key updates
    key_awareness: HashMap<String, bool>,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped whenever the current transport changes
    generation: u64,
    connecting: bool,
    connection: ConnectionState,
    error: Option<ConnectionError>,
}

impl CollabClient {
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(HttpConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = State {
            session: Session::new(events.clone(), config.read_only),
            scheduler: Scheduler::new(config.timings.throttle_window()),
            key_awareness: HashMap::new(),
            transport: None,
            generation: 0,
            connecting: false,
            connection: ConnectionState::Closed,
            error: None,
        };
        let inner = Arc::new_cyclic(|weak| Inner {
            config,
            connector,
            events,
            weak: weak.clone(),
            state: Mutex::new(state),
        });
        Self { inner }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Receive session notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connect, replacing any current connection.
    ///
    /// Tries the WebSocket, retries it once after the backoff and then falls
    /// back to HTTP polling. Read-only clients only fetch the session.
    pub async fn connect(&self) -> ClientResult<()> {
        self.disconnect().await;

        let (mut generation, batch) = {
            let mut state = self.inner.state.lock();
            let batch = state.session.unconfirmed_batch();
            state.session.reset();
            state.scheduler.clear();
            state.key_awareness.clear();
            state.generation += 1;
            state.connecting = true;
            state.error = None;
            self.inner.set_connection(&mut state, ConnectionState::Connecting);
            (state.generation, batch)
        };

        if let Some(batch) = batch.filter(|_| !self.inner.config.read_only) {
            let paths = batch.messages.len();
            match self.inner.connector.flush(batch).await {
                Ok(()) => info!(paths, "Delivered unconfirmed changes before reconnecting"),
                Err(e) => warn!(error = %e, paths, "Could not deliver unconfirmed changes"),
            }
        }

        let result = self.inner.establish(&mut generation).await;
        self.inner
            .finish_connect(generation, result)
            .map_err(ClientError::from)
    }

    /// Send everything pending and close the connection
    pub async fn disconnect(&self) {
        let transport = {
            let mut state = self.inner.state.lock();
            self.inner.flush_pending(&mut state);
            state.generation += 1;
            state.connecting = false;
            let transport = state.transport.take();
            if state.connection != ConnectionState::Closed {
                self.inner.set_connection(&mut state, ConnectionState::Closed);
            }
            transport
        };
        if let Some(transport) = transport {
            info!(transport = %transport.kind(), "Disconnecting");
            transport.disconnect(true).await;
        }
    }

    /// Dispatch a local event
    pub fn on_collab_event(&self, event: LocalEvent) -> ClientResult<()> {
        self.inner.local(event)
    }

    pub fn update_key(&self, path: impl Into<String>, value: Value, update_awareness: bool) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::UpdateKey {
            path: path.into(),
            value,
            update_awareness,
        })
    }

    pub fn update_text(
        &self,
        path: impl Into<String>,
        changes: ChangeSet,
        selection: Option<Selection>,
    ) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::UpdateText {
            path: path.into(),
            changes,
            selection,
        })
    }

    pub fn create(&self, path: impl Into<String>, value: Value) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::Create {
            path: path.into(),
            value,
        })
    }

    pub fn delete(&self, path: impl Into<String>) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::Delete { path: path.into() })
    }

    pub fn sort(&self, path: impl Into<String>, sort: Vec<SortEntry>) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::Sort {
            path: path.into(),
            sort,
        })
    }

    pub fn set_focus(&self, path: Option<String>, selection: Option<Selection>) -> ClientResult<()> {
        self.on_collab_event(LocalEvent::Awareness { path, selection })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        state
            .session
            .snapshot(state.connection, state.error.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn connection_error(&self) -> Option<ConnectionError> {
        self.inner.state.lock().error.clone()
    }

    /// Kind of the current transport, if any
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner
            .state
            .lock()
            .transport
            .as_ref()
            .map(|transport| transport.kind())
    }

    pub fn version(&self) -> u64 {
        self.inner.state.lock().session.version()
    }

    pub fn client_id(&self) -> Option<String> {
        self.inner.state.lock().session.client_id().map(str::to_string)
    }

    pub fn value(&self, path: &str) -> Option<Value> {
        self.inner.state.lock().session.value(path).cloned()
    }

    pub fn text(&self, path: &str) -> Option<String> {
        let state = self.inner.state.lock();
        state.session.document().text(path).ok().map(str::to_string)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.inner.state.lock().session.clients().to_vec()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.inner.state.lock().session.comments().to_vec()
    }

    pub fn set_comments(&self, comments: Vec<Comment>) {
        self.inner.state.lock().session.set_comments(comments);
    }

    pub fn upsert_comment(&self, comment: Comment) {
        self.inner.state.lock().session.upsert_comment(comment);
    }

    pub fn remove_comment(&self, id: &str) -> Option<Comment> {
        self.inner.state.lock().session.remove_comment(id)
    }
}

/// Stop trying other transports after these
fn is_final(error: &ConnectionError) -> bool {
    matches!(
        error,
        ConnectionError::PermissionDenied | ConnectionError::Superseded | ConnectionError::Protocol(_)
    )
}

impl Inner {
    fn set_connection(&self, state: &mut State, connection: ConnectionState) {
        state.connection = connection;
        let _ = self.events.send(SessionEvent::ConnectionChanged {
            state: connection,
            error: state.error.clone(),
        });
    }

    async fn establish(&self, generation: &mut u64) -> ConnectionResult<TransportKind> {
        if self.config.read_only {
            self.attempt(TransportKind::ReadOnly, generation).await?;
            return Ok(TransportKind::ReadOnly);
        }

        let error = match self.attempt(TransportKind::WebSocket, generation).await {
            Ok(()) => return Ok(TransportKind::WebSocket),
            Err(e) => e,
        };
        if is_final(&error) {
            return Err(error);
        }
        let backoff = self.config.timings.reconnect_backoff();
        warn!(
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "WebSocket connection failed, retrying"
        );
        tokio::time::sleep(backoff).await;

        let error = match self.attempt(TransportKind::WebSocket, generation).await {
            Ok(()) => return Ok(TransportKind::WebSocket),
            Err(e) => e,
        };
        if is_final(&error) {
            return Err(error);
        }
        warn!(error = %error, "WebSocket unavailable, falling back to HTTP polling");

        self.attempt(TransportKind::Polling, generation).await?;
        Ok(TransportKind::Polling)
    }

    /// Open one transport and make it current
    async fn attempt(&self, kind: TransportKind, generation: &mut u64) -> ConnectionResult<()> {
        let transport = {
            let mut state = self.state.lock();
            if state.generation != *generation {
                return Err(ConnectionError::Superseded);
            }
            state.generation += 1;
            *generation = state.generation;

            let handler = Arc::new(SessionHandler {
                inner: self.weak.clone(),
                generation: *generation,
            });
            let transport = self.connector.open(kind, handler)?;
            state.transport = Some(transport.clone());
            transport
        };

        info!(transport = %kind, "Connecting");
        let result = transport.connect().await;

        let outcome = {
            let mut state = self.state.lock();
            if state.generation != *generation {
                Err(state.error.clone().unwrap_or(ConnectionError::Superseded))
            } else {
                if result.is_err() {
                    state.transport = None;
                }
                result
            }
        };
        if let Err(e) = &outcome {
            debug!(transport = %kind, error = %e, "Connection attempt failed");
            transport.disconnect(false).await;
        }
        outcome
    }

    fn finish_connect(
        &self,
        generation: u64,
        result: ConnectionResult<TransportKind>,
    ) -> ConnectionResult<()> {
        let mut state = self.state.lock();
        if state.generation != generation {
            // A disconnect or a fatal error already took over
            return Err(result
                .err()
                .or_else(|| state.error.clone())
                .unwrap_or(ConnectionError::Superseded));
        }
        state.connecting = false;

        // The transport may have closed before we got here
        let result = result.and_then(|kind| match &state.transport {
            Some(transport) if transport.state() == ConnectionState::Open => Ok(kind),
            Some(transport) => Err(transport.error().unwrap_or_else(|| {
                ConnectionError::FailedToEstablish("connection closed".into())
            })),
            None => Err(ConnectionError::Superseded),
        });

        match &result {
            Ok(kind) => {
                info!(
                    transport = %kind,
                    version = state.session.version(),
                    "Connected"
                );
                state.error = None;
                self.set_connection(&mut state, ConnectionState::Open);
            }
            Err(e) => {
                warn!(error = %e, "Could not connect");
                state.transport = None;
                state.scheduler.clear();
                state.error = Some(e.clone());
                self.set_connection(&mut state, ConnectionState::Closed);
            }
        }
        result.map(|_| ())
    }

    fn receive(&self, generation: u64, message: Message) {
        let mut state = self.state.lock();
        if state.generation != generation {
            trace!(kind = message.kind(), "Ignoring message from a stale connection");
            return;
        }
        match state.session.receive(&message) {
            Ok(Followup::Nothing) => {}
            Ok(Followup::SendAwareness) => {
                state.scheduler.cancel(&ThrottleKey::Awareness);
                let awareness = state.session.awareness_message();
                self.send(&state, awareness);
            }
            Ok(Followup::Overwritten { path }) => {
                // Deferred sends below would resend the foreign value as ours
                let cancelled = state.scheduler.cancel_subtree(&path);
                if !cancelled.is_empty() {
                    debug!(path = %path, cancelled = cancelled.len(), "Remote overwrite cancelled pending sends");
                }
            }
            Err(e) => self.fail(&mut state, &message, message.path(), &e),
        }
    }

    fn transport_closed(&self, generation: u64, error: Option<ConnectionError>) {
        let mut state = self.state.lock();
        // Failures while connecting are reported by `connect`
        if state.generation != generation || state.connecting {
            return;
        }
        match &error {
            Some(e) => warn!(error = %e, "Connection lost"),
            None => info!("Connection closed by server"),
        }
        state.scheduler.clear();
        state.transport = None;
        state.error = error;
        self.set_connection(&mut state, ConnectionState::Closed);
    }

    fn replace_roster(&self, generation: u64, clients: Vec<ClientInfo>) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.session.replace_roster(clients);
        }
    }

    /// Tear the session down after an error it cannot recover from
    fn fail(&self, state: &mut State, event: &dyn Debug, path: Option<&str>, error: &ClientError) {
        error!(
            event = ?event,
            version = state.session.version(),
            value = ?path.and_then(|path| state.session.value(path)),
            unconfirmed = ?path.map(|path| state.session.unconfirmed(path)),
            error = %error,
            "Unrecoverable session error, disconnecting"
        );
        state.scheduler.clear();
        state.generation += 1;
        state.connecting = false;
        state.error = Some(ConnectionError::Protocol(error.to_string()));
        if let Some(transport) = state.transport.take() {
            tokio::spawn(async move {
                transport.disconnect(false).await;
            });
        }
        self.set_connection(state, ConnectionState::Closed);
    }

    fn local(&self, event: LocalEvent) -> ClientResult<()> {
        let mut state = self.state.lock();
        if !state.session.can_write() {
            debug!(path = ?event.path(), "No write permission, discarding local event");
            return Ok(());
        }
        match self.apply_local(&mut state, &event) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&mut state, &event, event.path(), &e);
                Err(e)
            }
        }
    }

    fn apply_local(&self, state: &mut State, event: &LocalEvent) -> ClientResult<()> {
        match event {
            LocalEvent::UpdateKey {
                path,
                value,
                update_awareness,
            } => {
                state.session.update_key(path, value.clone())?;
                // The overwrite invalidated everything queued below it
                let cancelled = state.scheduler.cancel_descendants(path);
                if !cancelled.is_empty() {
                    debug!(path = %path, cancelled = cancelled.len(), "Cancelled pending sends");
                }
                state.scheduler.cancel(&ThrottleKey::UpdateText(path.clone()));
                state.key_awareness.insert(path.clone(), *update_awareness);
                self.throttle(state, ThrottleKey::UpdateKey(path.clone()), Edge::LeadingAndTrailing);
            }
            LocalEvent::UpdateText {
                path,
                changes,
                selection,
            } => {
                state
                    .session
                    .update_text(path, changes.clone(), selection.clone())?;
                self.throttle(state, ThrottleKey::UpdateText(path.clone()), Edge::Trailing);
            }
            LocalEvent::Create { path, value } => {
                self.send(state, Message::create(path.clone(), value.clone()));
            }
            LocalEvent::Delete { path } => {
                state.scheduler.cancel_subtree(path);
                self.send(state, Message::delete(path.clone()));
            }
            LocalEvent::Sort { path, sort } => {
                self.send(state, Message::sort(path.clone(), sort.clone()));
            }
            LocalEvent::Awareness { path, selection } => {
                state.session.set_focus(path.clone(), selection.clone());
                self.throttle(state, ThrottleKey::Awareness, Edge::Trailing);
            }
        }
        Ok(())
    }

    fn throttle(&self, state: &mut State, key: ThrottleKey, edge: Edge) {
        match state.scheduler.call(key.clone(), edge, Instant::now()) {
            Decision::Fire => {
                self.send_throttled(state, &key);
            }
            Decision::Defer { ticket, delay } => self.arm(state.generation, key, ticket, delay),
            Decision::Coalesced => trace!(key = ?key, "Coalesced into pending send"),
        }
    }

    fn arm(&self, generation: u64, key: ThrottleKey, ticket: u64, delay: Duration) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(generation, &key, ticket);
            }
        });
    }

    fn fire(&self, generation: u64, key: &ThrottleKey, ticket: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if state.scheduler.take_due(key, ticket, Instant::now()) {
            self.send_throttled(&mut state, key);
        }
    }

    /// Send every deferred message now
    fn flush_pending(&self, state: &mut State) {
        let mut awareness_sent = false;
        for key in state.scheduler.drain_pending() {
            if key == ThrottleKey::Awareness && awareness_sent {
                continue;
            }
            awareness_sent |= self.send_throttled(state, &key);
        }
    }

    /// Build and send the message behind a throttle key. Returns true if it
    /// carried our awareness.
    fn send_throttled(&self, state: &mut State, key: &ThrottleKey) -> bool {
        match key {
            ThrottleKey::UpdateKey(path) => {
                let update_awareness = state.key_awareness.get(path).copied().unwrap_or(false);
                let Some(message) = state.session.key_update_message(path, update_awareness) else {
                    debug!(path = %path, "Value is gone, skipping key update");
                    return false;
                };
                let carried = update_awareness && state.session.is_focused(path);
                if carried {
                    state.scheduler.cancel(&ThrottleKey::Awareness);
                }
                self.send(state, message);
                carried
            }
            ThrottleKey::UpdateText(path) => {
                let Some(message) = state.session.text_update_message(path, true) else {
                    trace!(path = %path, "Nothing queued, skipping text update");
                    return false;
                };
                let carried = state.session.is_focused(path);
                if carried {
                    state.scheduler.cancel(&ThrottleKey::Awareness);
                }
                self.send(state, message);
                carried
            }
            ThrottleKey::Awareness => {
                let message = state.session.awareness_message();
                self.send(state, message);
                true
            }
        }
    }

    fn send(&self, state: &State, message: Message) {
        match &state.transport {
            Some(transport) => {
                trace!(kind = message.kind(), path = ?message.path(), "Sending");
                transport.send(message);
            }
            None => debug!(kind = message.kind(), "Not connected, dropping message"),
        }
    }
}

/// Routes transport callbacks of one connection generation to the client
struct SessionHandler {
    inner: Weak<Inner>,
    generation: u64,
}

impl TransportHandler for SessionHandler {
    fn on_receive(&self, message: Message) {
        if let Some(inner) = self.inner.upgrade() {
            inner.receive(self.generation, message);
        }
    }

    fn on_open(&self) {
        debug!(generation = self.generation, "Transport open");
    }

    fn on_close(&self, error: Option<&ConnectionError>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.transport_closed(self.generation, error.cloned());
        }
    }

    fn on_clients(&self, clients: Vec<ClientInfo>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.replace_roster(self.generation, clients);
        }
    }
}
