//! Tandem Transport Layer
//!
//! Provides the connections a Tandem client can sync over:
//! - WebSocket: persistent bidirectional socket with heartbeat and liveness checks
//! - Polling: HTTP fallback exchanging batches on a fixed interval
//! - Read-only: a single fetch of the session state
//! - TLS: `wss://` and `https://` endpoints (optional feature)

pub mod error;
pub mod http;
pub mod polling;
pub mod read_only;
pub mod transport;
pub mod websocket;

pub use error::{ConnectionError, ConnectionResult};
pub use http::HttpEndpoint;
pub use polling::PollingTransport;
pub use read_only::ReadOnlyTransport;
pub use transport::{ConnectionState, Transport, TransportHandler, TransportKind};
pub use websocket::{WebSocketConfig, WebSocketTransport};
