//! The contract every transport implements

use crate::error::{ConnectionError, ConnectionResult};
use async_trait::async_trait;
use tandem_core::ClientInfo;
use tandem_protocol::Message;

/// Connection lifecycle: `Closed -> Connecting -> Open -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

/// Transport strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
    ReadOnly,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Polling => write!(f, "polling"),
            TransportKind::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Receives inbound events of a transport.
///
/// Callbacks run on the transport's own task and must not block.
pub trait TransportHandler: Send + Sync + 'static {
    /// A decoded inbound message, in server order
    fn on_receive(&self, message: Message);

    /// The connection is open and `send` is accepted
    fn on_open(&self) {}

    /// An open connection closed. `None` means a clean close.
    fn on_close(&self, _error: Option<&ConnectionError>) {}

    /// A fresh roster reported outside of regular messages
    fn on_clients(&self, _clients: Vec<ClientInfo>) {}
}

/// A connection to the collaboration server
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the connection. Resolves once the initial state was delivered.
    async fn connect(&self) -> ConnectionResult<()>;

    /// Close the connection. With `flush`, messages already handed to
    /// `send` are delivered first.
    async fn disconnect(&self, flush: bool);

    /// Queue a message for delivery. Dropped unless the transport is open.
    fn send(&self, message: Message);

    fn state(&self) -> ConnectionState;

    /// The error that closed the connection, if any
    fn error(&self) -> Option<ConnectionError>;
}
