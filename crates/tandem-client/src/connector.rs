//! Construction of transports

use std::sync::Arc;

use async_trait::async_trait;
use tandem_protocol::PollRequest;
use tandem_transport::{
    ConnectionResult, HttpEndpoint, PollingTransport, ReadOnlyTransport, Transport,
    TransportHandler, TransportKind, WebSocketConfig, WebSocketTransport,
};
use tracing::debug;

use crate::config::ClientConfig;

/// Builds the transports a client connects through
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Create an unconnected transport of `kind` reporting to `handler`
    fn open(
        &self,
        kind: TransportKind,
        handler: Arc<dyn TransportHandler>,
    ) -> ConnectionResult<Arc<dyn Transport>>;

    /// POST a batch outside of any connection
    async fn flush(&self, batch: PollRequest) -> ConnectionResult<()>;
}

/// Connects to the endpoints named in a `ClientConfig`
pub struct HttpConnector {
    config: ClientConfig,
}

impl HttpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> ConnectionResult<HttpEndpoint> {
        HttpEndpoint::new(&self.config.http_url, self.config.timings.http_timeout())
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn open(
        &self,
        kind: TransportKind,
        handler: Arc<dyn TransportHandler>,
    ) -> ConnectionResult<Arc<dyn Transport>> {
        let timings = &self.config.timings;
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::WebSocket => Arc::new(
                WebSocketTransport::new(&self.config.websocket_url, handler).with_config(
                    WebSocketConfig {
                        heartbeat_interval: timings.heartbeat_interval(),
                        liveness_timeout: timings.liveness_timeout(),
                    },
                ),
            ),
            TransportKind::Polling => Arc::new(
                PollingTransport::new(self.endpoint()?, handler)
                    .with_interval(timings.poll_interval()),
            ),
            TransportKind::ReadOnly => Arc::new(ReadOnlyTransport::new(self.endpoint()?, handler)),
        };
        Ok(transport)
    }

    async fn flush(&self, batch: PollRequest) -> ConnectionResult<()> {
        debug!(messages = batch.messages.len(), "Flushing unconfirmed changes");
        let response = self.endpoint()?.exchange(&batch).await?;
        debug!(version = response.version, "Unconfirmed changes delivered");
        Ok(())
    }
}
