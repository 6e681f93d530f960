//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where to connect and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Persistent socket endpoint
    pub websocket_url: String,
    /// HTTP endpoint serving the initial state (GET) and batches (POST)
    pub http_url: String,
    /// Only fetch the document once; never send
    pub read_only: bool,
    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            websocket_url: "ws://127.0.0.1:8000/ws/collab".into(),
            http_url: "http://127.0.0.1:8000/api/collab".into(),
            read_only: false,
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(websocket_url: impl Into<String>, http_url: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            http_url: http_url.into(),
            ..Self::default()
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Timers, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub liveness_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub throttle_window_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 7_000,
            heartbeat_interval_ms: 30_000,
            throttle_window_ms: 1_000,
            poll_interval_ms: 10_000,
            reconnect_backoff_ms: 500,
            http_timeout_ms: 10_000,
        }
    }
}

impl Timings {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
