//! Server response types.
//!
//! The compute service reports job progress as a string token. Decoding it
//! into [`RunState`] keeps the queue's state machine total:
//!
//! ```text
//!   "pending" / "running"            ──→ in progress (poll again)
//!   "completed" / "error" / "canceled" ──→ terminal
//!   anything else                    ──→ Unknown(token), terminal
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Job state as reported by the compute service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunState {
    /// Accepted by the service but not yet executing.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Error,
    /// Stopped by a cancel request.
    Canceled,
    /// Unrecognized token, treated as terminal-with-error.
    Unknown(String),
}

impl RunState {
    /// Check whether the job is still pending or running on the server.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, RunState::Pending | RunState::Running)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// Check whether the state signals a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, RunState::Error | RunState::Unknown(_))
    }

    /// The wire token for this state.
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Error => "error",
            RunState::Canceled => "canceled",
            RunState::Unknown(token) => token,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Unknown(String::new())
    }
}

impl From<String> for RunState {
    fn from(token: String) -> Self {
        match token.as_str() {
            "pending" => RunState::Pending,
            "running" => RunState::Running,
            "completed" => RunState::Completed,
            "error" => RunState::Error,
            "canceled" => RunState::Canceled,
            _ => RunState::Unknown(token),
        }
    }
}

impl From<&str> for RunState {
    fn from(token: &str) -> Self {
        Self::from(token.to_string())
    }
}

impl From<RunState> for String {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Unknown(token) => token,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A response from `runSimulation` or `runStatus`.
///
/// Fields the queue does not interpret (reports, frame counts, plots...) are
/// kept in `extra` and handed to the caller untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Reported job state.
    #[serde(default)]
    pub state: RunState,
    /// Payload to send with the next `runStatus` poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_request: Option<Value>,
    /// Suggested delay before the next poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_request_seconds: Option<f64>,
    /// Error message, set by the server or by a failed transport call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// All other response fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunResponse {
    /// Create a response carrying only a state.
    pub fn new(state: impl Into<RunState>) -> Self {
        Self {
            state: state.into(),
            ..Self::default()
        }
    }

    /// Create an in-progress response that asks for another poll.
    pub fn in_progress(state: impl Into<RunState>, next_request: Value, seconds: f64) -> Self {
        Self::new(state)
            .with_next_request(next_request)
            .with_next_request_seconds(seconds)
    }

    /// Terminal error response standing in for a failed transport call.
    pub fn from_transport_error(err: &TransportError) -> Self {
        Self::new(RunState::Error).with_error(err.to_string())
    }

    /// Set the next poll payload.
    pub fn with_next_request(mut self, next_request: Value) -> Self {
        self.next_request = Some(next_request);
        self
    }

    /// Set the suggested poll delay.
    pub fn with_next_request_seconds(mut self, seconds: f64) -> Self {
        self.next_request_seconds = Some(seconds);
        self
    }

    /// Set the error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Add an uninterpreted field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Delay before the next poll, never shorter than `floor`.
    ///
    /// A missing, negative, non-finite or overflowing suggestion falls back
    /// to `floor`.
    pub fn poll_delay(&self, floor: Duration) -> Duration {
        self.next_request_seconds
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map_or(floor, |delay| delay.max(floor))
    }
}
