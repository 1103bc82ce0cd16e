//! Error types for the relay.

use std::time::Duration;
use thiserror::Error;

/// Boxed source error from a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while relaying messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or inconsistent configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A storage operation failed.
    #[error("Storage {operation} failed for '{key}': {source}")]
    Storage {
        /// The operation that failed (`put`, `get`, `delete`, `list`, ...).
        operation: &'static str,
        /// The object key or prefix involved.
        key: String,
        /// The backend error.
        #[source]
        source: BoxError,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Line framing error on a stdio stream.
    #[error(transparent)]
    Jsonl(#[from] mcp_relay_jsonl::Error),

    /// A payload was valid JSON but not a JSON-RPC message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The downstream command could not be started.
    #[error("Failed to spawn downstream '{command}': {source}")]
    SpawnFailed {
        /// The command that failed to spawn.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A call was made before the downstream was started.
    #[error("Downstream has not been started")]
    NotStarted,

    /// The downstream process exited.
    #[error("Downstream process exited")]
    DownstreamExited,

    /// No reply arrived from the downstream in time.
    #[error("Timed out after {0:?} waiting for downstream response")]
    DownstreamTimeout(Duration),

    /// HTTP transport failure talking to the downstream.
    #[error("HTTP request to downstream failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The downstream answered with a non-success HTTP status.
    #[error("Downstream returned HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The (possibly truncated) response body.
        body: String,
    },
}

impl Error {
    /// Create a storage error.
    #[must_use]
    pub fn storage(operation: &'static str, key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
