//! WebSocket transport
//!
//! One driver task per connection owns the socket. It multiplexes outbound
//! messages, the heartbeat, the liveness deadline and inbound frames.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tandem_protocol::{decode, decode_slice, encode, Message};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, ConnectionResult, CLOSE_ABNORMAL};
use crate::transport::{ConnectionState, Transport, TransportHandler, TransportKind};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Timing of a WebSocket connection
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Interval between heartbeat pings
    pub heartbeat_interval: Duration,
    /// How long to wait for any inbound message after sending
    pub liveness_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(7),
        }
    }
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    error: Option<ConnectionError>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    shutdown: Option<oneshot::Sender<bool>>,
    driver: Option<JoinHandle<()>>,
}

/// Persistent socket transport
pub struct WebSocketTransport {
    url: String,
    config: WebSocketConfig,
    handler: Arc<dyn TransportHandler>,
    shared: Arc<Mutex<Shared>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, handler: Arc<dyn TransportHandler>) -> Self {
        Self {
            url: url.into(),
            config: WebSocketConfig::default(),
            handler,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    fn fail(&self, error: ConnectionError) -> ConnectionError {
        let mut shared = self.shared.lock();
        shared.state = ConnectionState::Closed;
        shared.error = Some(error.clone());
        error
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shared.lock().shutdown.take() {
            let _ = shutdown.send(false);
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&self) -> ConnectionResult<()> {
        {
            let mut shared = self.shared.lock();
            if shared.state != ConnectionState::Closed {
                return Err(ConnectionError::FailedToEstablish("already connected".into()));
            }
            shared.state = ConnectionState::Connecting;
            shared.error = None;
        }
        info!(url = %self.url, "Opening WebSocket connection");

        let handshake = tokio::time::timeout(self.config.liveness_timeout, connect_async(self.url.as_str()));
        let socket = match handshake.await {
            Ok(Ok((socket, _))) => socket,
            Ok(Err(WsError::Http(response))) if response.status().as_u16() == 403 => {
                warn!(url = %self.url, "WebSocket handshake rejected");
                return Err(self.fail(ConnectionError::PermissionDenied));
            }
            Ok(Err(e)) => {
                return Err(self.fail(ConnectionError::FailedToEstablish(e.to_string())));
            }
            Err(_) => {
                return Err(self.fail(ConnectionError::FailedToEstablish("handshake timed out".into())));
            }
        };

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock();
            shared.state = ConnectionState::Open;
            shared.outbound = Some(out_tx);
            shared.shutdown = Some(shutdown_tx);
        }
        info!(url = %self.url, "WebSocket connection open");
        self.handler.on_open();

        let driver = Driver {
            config: self.config,
            handler: self.handler.clone(),
            shared: self.shared.clone(),
            ready: Some(ready_tx),
        };
        let handle = tokio::spawn(driver.run(socket, out_rx, shutdown_rx));
        self.shared.lock().driver = Some(handle);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(self
                .error()
                .unwrap_or_else(|| ConnectionError::FailedToEstablish("connection task ended".into()))),
        }
    }

    async fn disconnect(&self, flush: bool) {
        let (shutdown, driver) = {
            let mut shared = self.shared.lock();
            (shared.shutdown.take(), shared.driver.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(flush);
        }
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        self.shared.lock().state = ConnectionState::Closed;
    }

    fn send(&self, message: Message) {
        let shared = self.shared.lock();
        match &shared.outbound {
            Some(outbound) if shared.state == ConnectionState::Open => {
                if outbound.send(message).is_err() {
                    debug!("WebSocket driver gone, dropping message");
                }
            }
            _ => debug!(kind = message.kind(), "WebSocket not open, dropping message"),
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    fn error(&self) -> Option<ConnectionError> {
        self.shared.lock().error.clone()
    }
}

struct Driver {
    config: WebSocketConfig,
    handler: Arc<dyn TransportHandler>,
    shared: Arc<Mutex<Shared>>,
    ready: Option<oneshot::Sender<ConnectionResult<()>>>,
}

impl Driver {
    async fn run(
        mut self,
        socket: Socket,
        mut out_rx: mpsc::UnboundedReceiver<Message>,
        mut shutdown_rx: oneshot::Receiver<bool>,
    ) {
        let (mut write, mut read) = socket.split();

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Armed from the start so a server that never sends INIT is detected
        let liveness = tokio::time::sleep(self.config.liveness_timeout);
        tokio::pin!(liveness);
        let mut armed = true;

        let closed = loop {
            tokio::select! {
                flush = &mut shutdown_rx => {
                    if flush.unwrap_or(false) {
                        while let Ok(message) = out_rx.try_recv() {
                            if let Err(e) = send_message(&mut write, &message).await {
                                warn!(error = %e, "Failed to flush message before close");
                                break;
                            }
                        }
                    }
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    debug!("WebSocket closed by client");
                    break Closed::ByClient;
                }

                Some(message) = out_rx.recv() => {
                    if let Err(e) = send_message(&mut write, &message).await {
                        break Closed::Lost(ConnectionError::Abnormal { code: CLOSE_ABNORMAL, reason: e.to_string() });
                    }
                    if !armed {
                        liveness.as_mut().reset(Instant::now() + self.config.liveness_timeout);
                        armed = true;
                    }
                }

                _ = heartbeat.tick() => {
                    trace!("Sending heartbeat");
                    if let Err(e) = send_message(&mut write, &Message::ping()).await {
                        break Closed::Lost(ConnectionError::Abnormal { code: CLOSE_ABNORMAL, reason: e.to_string() });
                    }
                    if !armed {
                        liveness.as_mut().reset(Instant::now() + self.config.liveness_timeout);
                        armed = true;
                    }
                }

                _ = &mut liveness, if armed => {
                    warn!(timeout_ms = self.config.liveness_timeout.as_millis() as u64, "No response from server, closing");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break Closed::Lost(ConnectionError::LivenessTimeout);
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            armed = false;
                            self.deliver(decode(&text));
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            armed = false;
                            self.deliver(decode_slice(&data));
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            armed = false;
                            let _ = write.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.to_string()))
                                .unwrap_or((1000, String::new()));
                            info!(code, reason = %reason, "WebSocket closed by server");
                            break match ConnectionError::from_close(code, &reason) {
                                Some(error) => Closed::Lost(error),
                                None => Closed::ByServer,
                            };
                        }
                        Some(Ok(_)) => {
                            armed = false;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read error");
                            break Closed::Lost(ConnectionError::Abnormal { code: CLOSE_ABNORMAL, reason: e.to_string() });
                        }
                        None => {
                            break Closed::Lost(ConnectionError::Abnormal {
                                code: CLOSE_ABNORMAL,
                                reason: "connection closed without close frame".into(),
                            });
                        }
                    }
                }
            }
        };

        self.finish(closed);
    }

    fn deliver(&mut self, decoded: tandem_protocol::ProtocolResult<Message>) {
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                return;
            }
        };
        debug!(kind = message.kind(), version = ?message.version(), "Received message");

        let is_init = matches!(message, Message::Init(_));
        self.handler.on_receive(message);
        if is_init {
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Ok(()));
            }
        }
    }

    fn finish(mut self, closed: Closed) {
        let outcome = match &closed {
            Closed::Lost(error) => Some(error.clone()),
            Closed::ByClient | Closed::ByServer => None,
        };
        {
            let mut shared = self.shared.lock();
            shared.state = ConnectionState::Closed;
            shared.outbound = None;
            shared.shutdown = None;
            shared.error = outcome.clone();
        }

        if let Some(ready) = self.ready.take() {
            // Closed before the initial state arrived
            let error = match closed {
                Closed::ByClient => ConnectionError::Superseded,
                Closed::ByServer => {
                    ConnectionError::FailedToEstablish("closed before initial state".into())
                }
                Closed::Lost(ConnectionError::Abnormal { reason, .. }) => {
                    ConnectionError::FailedToEstablish(reason)
                }
                Closed::Lost(error) => error,
            };
            let _ = ready.send(Err(error));
        }

        match &outcome {
            Some(error) => warn!(error = %error, "WebSocket connection lost"),
            None => info!("WebSocket connection closed"),
        }
        self.handler.on_close(outcome.as_ref());
    }
}

/// How the driver loop ended
enum Closed {
    ByClient,
    ByServer,
    Lost(ConnectionError),
}

async fn send_message<S>(write: &mut S, message: &Message) -> Result<(), WsError>
where
    S: futures_util::Sink<WsMessage, Error = WsError> + Unpin,
{
    let text = match encode(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "Failed to encode message");
            return Ok(());
        }
    };
    trace!(kind = message.kind(), "Sending message");
    write.send(WsMessage::Text(text)).await
}
