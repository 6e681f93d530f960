//! Error types for the synchronization engine

use tandem_transport::ConnectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Document error: {0}")]
    Core(#[from] tandem_core::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tandem_protocol::ProtocolError),
}

/// Result type alias for engine operations
pub type ClientResult<T> = Result<T, ClientError>;
