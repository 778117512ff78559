//! Error types for browser automation operations.

use thiserror::Error;

/// Result type alias for browser operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during browser automation.
#[derive(Debug, Error)]
pub enum Error {
    /// A required parameter was absent at call entry.
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A poll, wait, or navigation bound was exceeded.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The pointer-motion capability failed; callers must not assume any
    /// partial movement occurred.
    #[error("Pointer motion failed: {0}")]
    PointerMotion(String),

    /// Clipboard-paste typing was requested with key-code input.
    #[error("Incompatible input mode: {0}")]
    IncompatibleInputMode(String),

    /// In-page script evaluation threw.
    #[error("Script evaluation failed: {0}")]
    Script(String),

    /// Transport or protocol failure from the runtime.
    #[error(transparent)]
    Runtime(#[from] pilot_runtime::Error),

    /// JSON (de)serialization failure outside the tolerated snapshot-chunk
    /// parse path.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else, wrapped with its original message.
    #[error("{0}")]
    Unexpected(String),
}

impl Error {
    /// Taxonomy name used in the RPC error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingParameter(_) => "MissingParameter",
            Error::Timeout(_) => "Timeout",
            Error::PointerMotion(_) => "PointerMotionFailure",
            Error::IncompatibleInputMode(_) => "IncompatibleInputMode",
            Error::Runtime(e) if e.is_timeout() => "Timeout",
            _ => "Unexpected",
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Runtime(e) => e.is_timeout(),
            _ => false,
        }
    }
}
