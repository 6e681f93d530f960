//! Request and response bodies of the HTTP polling endpoint

use crate::message::Message;
use serde::{Deserialize, Serialize};
use tandem_core::ClientInfo;

/// Batch of queued outgoing messages POSTed on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRequest {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub messages: Vec<Message>,
}

impl PollRequest {
    pub fn new(version: u64, client_id: Option<String>, messages: Vec<Message>) -> Self {
        Self {
            version,
            client_id,
            messages,
        }
    }
}

/// Everything the server produced since the version named in the request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Current roster, when the server includes it
    #[serde(default)]
    pub clients: Option<Vec<ClientInfo>>,
}
