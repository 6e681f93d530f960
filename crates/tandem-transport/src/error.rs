//! Connection error types

use thiserror::Error;

/// Close code a server uses to reject a client it does not authorize
pub const CLOSE_PERMISSION_DENIED: u16 = 4403;
/// Close code used when the session itself is not accessible
pub const CLOSE_SESSION_FORBIDDEN: u16 = 4443;
/// Standard "service restart" close code
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Reserved code for a connection lost without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Why a connection could not be established or was lost
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Failed to establish connection: {0}")]
    FailedToEstablish(String),

    #[error("Server is restarting")]
    ServerRestarting,

    #[error("Connection closed abnormally ({code}): {reason}")]
    Abnormal { code: u16, reason: String },

    #[error("Connection timed out")]
    LivenessTimeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection attempt superseded")]
    Superseded,
}

impl ConnectionError {
    /// Classify a close frame. Returns `None` for a clean close.
    pub fn from_close(code: u16, reason: &str) -> Option<Self> {
        match code {
            1000 | 1001 => None,
            CLOSE_PERMISSION_DENIED | CLOSE_SESSION_FORBIDDEN => Some(ConnectionError::PermissionDenied),
            CLOSE_SERVICE_RESTART => Some(ConnectionError::ServerRestarting),
            code => Some(ConnectionError::Abnormal {
                code,
                reason: reason.to_string(),
            }),
        }
    }

    /// Returns true if connecting again may succeed without user action
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::PermissionDenied | ConnectionError::Protocol(_)
        )
    }
}

impl From<tandem_protocol::ProtocolError> for ConnectionError {
    fn from(err: tandem_protocol::ProtocolError) -> Self {
        ConnectionError::Protocol(err.to_string())
    }
}

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;
