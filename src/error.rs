//! Error types for the sync client.

use thiserror::Error;

/// Errors surfaced by the sync client.
///
/// Expected network failures are not represented here: they become
/// connection state transitions and lifecycle notifications instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The stream endpoint could not be parsed.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A WebSocket error while opening or driving the transport.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The endpoint source could not provide a URL or access key.
    #[error("endpoint unavailable: {0}")]
    Endpoint(String),

    /// The connection manager task has already shut down.
    #[error("connection manager is not running")]
    NotRunning,
}

impl SyncError {
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::Endpoint(message.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type alias for sync client operations.
pub type Result<T> = std::result::Result<T, SyncError>;
