//! HTTP endpoint shared by the polling and read-only transports

use std::time::Duration;

use reqwest::StatusCode;
use tandem_protocol::{decode_slice, Message, PollRequest, PollResponse, MAX_MESSAGE_SIZE};
use tracing::debug;

use crate::error::{ConnectionError, ConnectionResult};

/// Client for the session's HTTP endpoint.
///
/// `GET` returns the initial state, `POST` exchanges a batch of messages.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> ConnectionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the initial session state
    pub async fn fetch_init(&self) -> ConnectionResult<Message> {
        debug!(url = %self.url, "Fetching initial state");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ConnectionError::FailedToEstablish(e.to_string()))?;
        let body = check_status(response)?
            .bytes()
            .await
            .map_err(|e| ConnectionError::Http(e.to_string()))?;

        let message = decode_slice(&body)?;
        match message {
            Message::Init(_) => Ok(message),
            other => Err(ConnectionError::Protocol(format!(
                "expected collab.init, got {}",
                other.kind()
            ))),
        }
    }

    /// Send a batch and receive everything the server produced since
    /// `request.version`
    pub async fn exchange(&self, request: &PollRequest) -> ConnectionResult<PollResponse> {
        debug!(
            url = %self.url,
            version = request.version,
            messages = request.messages.len(),
            "Posting batch"
        );
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ConnectionError::Http(e.to_string()))?;
        let body = check_status(response)?
            .bytes()
            .await
            .map_err(|e| ConnectionError::Http(e.to_string()))?;

        if body.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::Protocol(format!(
                "response too large: {} > {}",
                body.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        serde_json::from_slice(&body).map_err(|e| ConnectionError::Protocol(e.to_string()))
    }
}

fn check_status(response: reqwest::Response) -> ConnectionResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectionError::PermissionDenied),
        status => Err(ConnectionError::Http(format!("unexpected status {}", status))),
    }
}
