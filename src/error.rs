//! Error types for plugin-rpc.

use thiserror::Error;

use crate::protocol::SerializedError;

/// Main error type for all RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The call was cancelled before it was sent, or the protocol was disposed.
    #[error("Canceled")]
    Canceled,

    /// The remote handler failed with a real error.
    #[error("{}: {}", .0.name, .0.message)]
    Remote(SerializedError),

    /// The remote handler rejected with something that was not an error.
    ///
    /// The payload is not transferred; the rejection carries no value.
    #[error("Remote call rejected without an error value")]
    Rejected,

    /// The connection or the engine went away before a reply arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error on a byte-stream transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload could not be reconstructed (bad envelope, bad URI, ...).
    #[error("Decode error: {0}")]
    Decode(String),

    /// Protocol error (malformed message, oversized frame, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Returns `true` for the local cancellation error.
    pub fn is_canceled(&self) -> bool {
        matches!(self, RpcError::Canceled)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
