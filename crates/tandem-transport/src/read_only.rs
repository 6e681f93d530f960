//! Read-only transport: one initial fetch, nothing is ever sent

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_protocol::Message;
use tracing::{debug, info};

use crate::error::{ConnectionError, ConnectionResult};
use crate::http::HttpEndpoint;
use crate::transport::{ConnectionState, Transport, TransportHandler, TransportKind};

pub struct ReadOnlyTransport {
    endpoint: HttpEndpoint,
    handler: Arc<dyn TransportHandler>,
    state: Mutex<(ConnectionState, Option<ConnectionError>)>,
}

impl ReadOnlyTransport {
    pub fn new(endpoint: HttpEndpoint, handler: Arc<dyn TransportHandler>) -> Self {
        Self {
            endpoint,
            handler,
            state: Mutex::new((ConnectionState::Closed, None)),
        }
    }
}

#[async_trait]
impl Transport for ReadOnlyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::ReadOnly
    }

    async fn connect(&self) -> ConnectionResult<()> {
        *self.state.lock() = (ConnectionState::Connecting, None);
        info!(url = %self.endpoint.url(), "Fetching read-only session");

        match self.endpoint.fetch_init().await {
            Ok(init) => {
                self.state.lock().0 = ConnectionState::Open;
                self.handler.on_open();
                self.handler.on_receive(init);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = (ConnectionState::Closed, Some(e.clone()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self, _flush: bool) {
        let was_open = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.0, ConnectionState::Closed) == ConnectionState::Open
        };
        if was_open {
            self.handler.on_close(None);
        }
    }

    fn send(&self, message: Message) {
        debug!(kind = message.kind(), "Read-only transport ignores outgoing message");
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().0
    }

    fn error(&self) -> Option<ConnectionError> {
        self.state.lock().1.clone()
    }
}
