//! RPC connection error types
//!
//! All connection, correlation and subscription failures are wrapped in
//! `RpcError`, which implements thiserror for consistent error handling.

use thiserror::Error;

/// Errors raised by the connection/subscription layer
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// The socket dropped while the request was in flight
    #[error("Connection lost")]
    ConnectionLost,

    /// No live connection to transmit on
    #[error("Not connected")]
    NotConnected,

    /// Connection attempt failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Every attempt timed out
    #[error("Request '{method}' timed out after {retries} retries")]
    RequestTimeout { method: String, retries: u32 },

    /// JSON-RPC error object returned by the node
    #[error("RPC error {code}: {message}")]
    Server { code: i64, message: String },

    /// Physical subscription cap reached; callers should fall back to polling
    #[error("Subscription capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// Subscription could not be established
    #[error("Subscription failed for {key}: {reason}")]
    SubscriptionFailed { key: String, reason: String },

    /// Acknowledgement did not arrive in time
    #[error("Subscription {key} not confirmed within {timeout_ms}ms")]
    ConfirmationTimeout { key: String, timeout_ms: u64 },

    /// Invalid or unexpected response from the node
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Manager was shut down explicitly
    #[error("Connection manager shut down")]
    Shutdown,
}

impl RpcError {
    /// Transport-level failures that may succeed when retried later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::ConnectionLost
                | RpcError::NotConnected
                | RpcError::ConnectionFailed(_)
                | RpcError::RequestTimeout { .. }
                | RpcError::WebSocket(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RpcError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RpcError::WebSocket(e.to_string())
    }
}

/// Result type alias for RPC operations
pub type RpcResult<T> = std::result::Result<T, RpcError>;
