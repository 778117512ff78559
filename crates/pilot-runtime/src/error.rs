//! Error types for the CDP runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the CDP runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to establish the WebSocket connection to the browser.
    #[error("Failed to connect to browser at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Transport-level error (WebSocket communication).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection this request was bound to has been torn down.
    /// Callers holding a stale generation should re-acquire the client's
    /// current connection and retry.
    #[error("Connection closed (generation {generation})")]
    ConnectionClosed { generation: u64 },

    /// Protocol-level error (malformed or unexpected message).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the browser in a command response.
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// Timeout waiting for a command response.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
