//! Tandem Client - Synchronization Engine
//!
//! Keeps a local copy of a collaborative document consistent with the
//! server while several users edit it:
//! - Local edits apply immediately and are sent through per-path throttles
//! - Server updates are rebased against the changes still in flight
//! - Presence and comment anchors follow every text edit
//! - Connections fall back from WebSocket to HTTP polling
//!
//! ## Example
//! ```no_run
//! use tandem_client::{ClientConfig, CollabClient};
//!
//! # async fn run() -> tandem_client::ClientResult<()> {
//! let client = CollabClient::new(ClientConfig::default());
//! client.connect().await?;
//! client.update_key("title", serde_json::json!("Report"), false)?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod session;
pub mod throttle;

pub use client::CollabClient;
pub use config::{ClientConfig, Timings};
pub use connector::{Connector, HttpConnector};
pub use error::{ClientError, ClientResult};
pub use event::{LocalEvent, SessionEvent, SessionSnapshot};
pub use session::{Followup, Session};
pub use throttle::{Decision, Edge, Scheduler, ThrottleKey};
