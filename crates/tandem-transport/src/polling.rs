//! HTTP polling transport
//!
//! Used when no WebSocket can be established. Outgoing messages are queued
//! and POSTed as one batch on every poll; the response carries everything
//! the server produced since our version.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_protocol::{Message, PollRequest};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ConnectionError, ConnectionResult};
use crate::http::HttpEndpoint;
use crate::transport::{ConnectionState, Transport, TransportHandler, TransportKind};

#[derive(Default)]
struct PollState {
    state: ConnectionState,
    error: Option<ConnectionError>,
    queue: Vec<Message>,
    version: u64,
    client_id: Option<String>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

struct Poller {
    endpoint: HttpEndpoint,
    handler: Arc<dyn TransportHandler>,
    state: Mutex<PollState>,
}

impl Poller {
    /// POST the queued messages and deliver the response
    async fn flush(&self) -> ConnectionResult<()> {
        let request = {
            let mut state = self.state.lock();
            PollRequest::new(
                state.version,
                state.client_id.clone(),
                std::mem::take(&mut state.queue),
            )
        };
        let response = self.endpoint.exchange(&request).await?;

        {
            let mut state = self.state.lock();
            let newest = response.messages.iter().filter_map(Message::version).max();
            state.version = state.version.max(response.version).max(newest.unwrap_or(0));
        }
        debug!(
            version = response.version,
            messages = response.messages.len(),
            "Poll response"
        );

        if let Some(clients) = response.clients {
            self.handler.on_clients(clients);
        }
        for message in response.messages {
            self.handler.on_receive(message);
        }
        Ok(())
    }

    /// Mark the transport closed. Reports to the handler only once.
    fn close(&self, error: Option<ConnectionError>) {
        {
            let mut state = self.state.lock();
            if state.state == ConnectionState::Closed {
                return;
            }
            state.state = ConnectionState::Closed;
            state.error = error.clone();
            state.shutdown = None;
            state.queue.clear();
        }
        self.handler.on_close(error.as_ref());
    }

    async fn run(self: Arc<Self>, period: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "Poll failed, closing connection");
                        self.close(Some(e));
                        return;
                    }
                }
            }
        }
    }
}

/// Polling fallback transport
pub struct PollingTransport {
    poller: Arc<Poller>,
    interval: Duration,
}

impl PollingTransport {
    pub fn new(endpoint: HttpEndpoint, handler: Arc<dyn TransportHandler>) -> Self {
        Self {
            poller: Arc::new(Poller {
                endpoint,
                handler,
                state: Mutex::new(PollState::default()),
            }),
            interval: Duration::from_secs(10),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Number of messages waiting for the next poll
    pub fn queued(&self) -> usize {
        self.poller.state.lock().queue.len()
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.poller.state.lock().shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn connect(&self) -> ConnectionResult<()> {
        {
            let mut state = self.poller.state.lock();
            if state.state != ConnectionState::Closed {
                return Err(ConnectionError::FailedToEstablish("already connected".into()));
            }
            state.state = ConnectionState::Connecting;
            state.error = None;
        }
        info!(url = %self.poller.endpoint.url(), "Connecting with HTTP polling");

        let init = match self.poller.endpoint.fetch_init().await {
            Ok(init) => init,
            Err(e) => {
                let mut state = self.poller.state.lock();
                state.state = ConnectionState::Closed;
                state.error = Some(e.clone());
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut state = self.poller.state.lock();
            state.version = init.version().unwrap_or(0);
            state.client_id = init.client_id().map(str::to_string);
            state.state = ConnectionState::Open;
            state.shutdown = Some(shutdown_tx);
        }
        self.poller.handler.on_open();
        self.poller.handler.on_receive(init);

        let task = tokio::spawn(self.poller.clone().run(self.interval, shutdown_rx));
        self.poller.state.lock().task = Some(task);
        info!(interval_ms = self.interval.as_millis() as u64, "Polling started");
        Ok(())
    }

    async fn disconnect(&self, flush: bool) {
        let (shutdown, task) = {
            let mut state = self.poller.state.lock();
            (state.shutdown.take(), state.task.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(task) = task {
            let _ = task.await;
        }

        if flush && self.state() == ConnectionState::Open {
            if let Err(e) = self.poller.flush().await {
                warn!(error = %e, "Final flush failed");
            }
        }
        self.poller.close(None);
    }

    fn send(&self, message: Message) {
        let mut state = self.poller.state.lock();
        if state.state == ConnectionState::Open {
            state.queue.push(message);
        } else {
            debug!(kind = message.kind(), "Polling transport not open, dropping message");
        }
    }

    fn state(&self) -> ConnectionState {
        self.poller.state.lock().state
    }

    fn error(&self) -> Option<ConnectionError> {
        self.poller.state.lock().error.clone()
    }
}
