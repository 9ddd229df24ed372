//! Errors from the wire protocol layer.

use crate::rate_limit::RateLimitError;
use thiserror::Error;

/// A single envelope could not be parsed.
///
/// Connection loops treat this as one bad message and keep reading.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(&'static str),
}

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Registration failed: {0}")]
    Registration(String),
    #[error("Relay handshake failed: {0}")]
    RelayHandshake(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for WireError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WireError::WebSocket(Box::new(e))
    }
}

/// Alias for wire results.
pub type WireResult<T> = Result<T, WireError>;
