//! Run Queue — client-side dispatcher for long-running simulation jobs
//!
//! This crate submits simulation runs to a remote compute service, polls
//! their status at the interval the server asks for, and applies the
//! queuing and cancellation policy for two classes of work:
//!
//! - **persistent** items start immediately and report every status update
//! - **transient** items run one at a time in submission order and report
//!   only their final response
//!
//! # Overview
//!
//! - [`RunQueue`] owns the queue and the scheduling policy
//! - [`QueueItem`] is the handle returned for each submission
//! - [`Transport`] is the request/response channel to the service, with
//!   [`HttpTransport`] as the HTTP+JSON implementation
//! - [`RunResponse`] / [`RunState`] decode what the service reports
//! - [`QueueConfig`] / [`ServerConfig`] hold settings, loadable from the
//!   environment
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use run_queue::{HttpTransport, QueueConfig, RunQueue, ServerConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::new(&ServerConfig::new("http://localhost:8000"))?;
//!     let queue = RunQueue::new(Arc::new(transport), QueueConfig::new("elegant"));
//!
//!     let models = json!({"simulation": {"simulationId": "Xyz12"}});
//!     let item = queue.add_transient_item("animation", &models, |response| {
//!         println!("animation finished: {}", response.state);
//!     })?;
//!
//!     // Later, when the user navigates away:
//!     queue.cancel_item(&item);
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   add*() ──→ Pending ──→ Processing ──→ Done ──→ Removing
//!                              │
//!                              └──→ Canceled ──→ Removing
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod item;
pub mod queue;
pub mod response;
pub mod transport;

pub use config::{QueueConfig, ServerConfig, MIN_POLL_INTERVAL};
pub use error::{QueueError, QueueResult, TransportError, TransportResult};
pub use http::HttpTransport;
pub use item::{ItemId, ItemMode, ItemState, Operation, QueueItem, ResponseHandler};
pub use queue::RunQueue;
pub use response::{RunResponse, RunState};
pub use transport::{RunRequest, Transport, SIMULATION_STATUS_KEY};
