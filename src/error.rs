//! Run queue error types.
//!
//! Errors are split by where they surface:
//!
//! | Type | Raised by | Reaches the caller as |
//! |------|-----------|-----------------------|
//! | [`QueueError`] | enqueue, configuration loading | `Err` from the call |
//! | [`TransportError`] | [`Transport::send`](crate::Transport::send) | a terminal `error` response via `onResponse` |
//!
//! Once an item has been accepted, nothing is returned as an `Err`: every
//! outcome is delivered through the item's response handler.

use thiserror::Error;

/// Errors returned synchronously by queue operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// Caller-supplied models cannot be turned into a run request.
    #[error("Invalid models: {0}")]
    InvalidModels(String),

    /// Missing or malformed configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A request payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors produced while talking to the compute service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    // ── Transient errors (the server may answer later) ───────────────
    /// The HTTP round trip itself failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The compute service cannot be reached.
    #[error("Compute service unavailable: {0}")]
    Unavailable(String),

    // ── Permanent errors ─────────────────────────────────────────────
    /// The service answered with a non-success status code.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Body returned with the status.
        message: String,
    },

    /// The response body was not a valid run response.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl TransportError {
    /// Create an API error from a status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if the same request might succeed when sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Unavailable(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
