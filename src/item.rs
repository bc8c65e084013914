//! Queue item lifecycle types.
//!
//! The item state machine:
//!
//! ```text
//!   add*() ──→ Pending ──→ Processing ──→ Done
//!                 │            │
//!                 │            └──→ Canceled
//!                 │
//!                 └──(any state)──→ Removing
//! ```
//!
//! **Invariants:**
//! - Once `Removing`, `Done` or `Canceled`, an item never returns to
//!   `Pending` or `Processing`.
//! - `Removing` is entered exactly once; the item leaves the queue at the
//!   same moment.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::response::RunResponse;

/// Callback receiving server responses for one item.
pub type ResponseHandler = Arc<dyn Fn(RunResponse) + Send + Sync>;

/// Unique identifier for a queue item, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling class of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemMode {
    /// Persistent item whose first call is a status check.
    PersistentStatus,
    /// Always-running item, started with `forceRun`.
    Persistent,
    /// Serialized behind other transient items.
    Transient,
}

impl ItemMode {
    /// Persistent items bypass the transient FIFO.
    pub fn is_persistent(self) -> bool {
        matches!(self, ItemMode::PersistentStatus | ItemMode::Persistent)
    }

    /// Operation used for the first network call.
    pub fn first_operation(self) -> Operation {
        match self {
            ItemMode::PersistentStatus => Operation::RunStatus,
            ItemMode::Persistent | ItemMode::Transient => Operation::RunSimulation,
        }
    }

    /// Whether the initial request asks the server to rerun the job.
    pub fn force_run(self) -> bool {
        matches!(self, ItemMode::Persistent)
    }
}

impl fmt::Display for ItemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemMode::PersistentStatus => write!(f, "persistentStatus"),
            ItemMode::Persistent => write!(f, "persistent"),
            ItemMode::Transient => write!(f, "transient"),
        }
    }
}

/// Local lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    /// Queued, no request sent yet.
    Pending,
    /// A request or poll cycle is active.
    Processing,
    /// A terminal response was received.
    Done,
    /// Left the queue; late responses are dropped.
    Removing,
    /// Canceled while processing.
    Canceled,
}

impl ItemState {
    /// Check if the item can no longer be started or polled.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ItemState::Done | ItemState::Removing | ItemState::Canceled
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Pending => write!(f, "pending"),
            ItemState::Processing => write!(f, "processing"),
            ItemState::Done => write!(f, "done"),
            ItemState::Removing => write!(f, "removing"),
            ItemState::Canceled => write!(f, "canceled"),
        }
    }
}

/// Named operations understood by the compute service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Start (or look up) a simulation run.
    #[serde(rename = "runSimulation")]
    RunSimulation,
    /// Poll the status of a run.
    #[serde(rename = "runStatus")]
    RunStatus,
    /// Ask the service to stop a run.
    #[serde(rename = "runCancel")]
    RunCancel,
}

impl Operation {
    /// Operation name as used on the wire.
    pub fn name(self) -> &'static str {
        match self {
            Operation::RunSimulation => "runSimulation",
            Operation::RunStatus => "runStatus",
            Operation::RunCancel => "runCancel",
        }
    }

    /// HTTP route serving this operation.
    pub fn route(self) -> &'static str {
        match self {
            Operation::RunSimulation => "/run-simulation",
            Operation::RunStatus => "/run-status",
            Operation::RunCancel => "/run-cancel",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable part of an item, only touched while the owning queue is locked.
pub(crate) struct ItemRecord {
    pub(crate) mode: ItemMode,
    pub(crate) state: ItemState,
    pub(crate) request: Value,
    pub(crate) poll_count: u32,
    pub(crate) pending_timer: Option<JoinHandle<()>>,
}

impl ItemRecord {
    /// Abort the scheduled poll, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            timer.abort();
        }
    }
}

struct ItemInner {
    id: ItemId,
    report: String,
    first_operation: Operation,
    created_at: DateTime<Utc>,
    on_response: ResponseHandler,
    record: Mutex<ItemRecord>,
}

/// Handle to a submitted unit of work.
///
/// Handles are cheap to clone; all clones refer to the same item. Keep one
/// to observe the item or to cancel it later.
#[derive(Clone)]
pub struct QueueItem {
    inner: Arc<ItemInner>,
}

impl QueueItem {
    pub(crate) fn new(
        id: ItemId,
        report: String,
        mode: ItemMode,
        request: Value,
        on_response: ResponseHandler,
    ) -> Self {
        Self {
            inner: Arc::new(ItemInner {
                id,
                report,
                first_operation: mode.first_operation(),
                created_at: Utc::now(),
                on_response,
                record: Mutex::new(ItemRecord {
                    mode,
                    state: ItemState::Pending,
                    request,
                    poll_count: 0,
                    pending_timer: None,
                }),
            }),
        }
    }

    pub(crate) fn record(&self) -> MutexGuard<'_, ItemRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self, response: RunResponse) {
        (self.inner.on_response)(response);
    }

    /// Queue-assigned identifier.
    pub fn id(&self) -> ItemId {
        self.inner.id
    }

    /// Identifying report key.
    pub fn report(&self) -> &str {
        &self.inner.report
    }

    /// Operation used for the first network call.
    pub fn first_operation(&self) -> Operation {
        self.inner.first_operation
    }

    /// When the item was enqueued.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current scheduling class.
    pub fn mode(&self) -> ItemMode {
        self.record().mode
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ItemState {
        self.record().state
    }

    /// Whether the item currently runs outside the transient FIFO.
    pub fn is_persistent(&self) -> bool {
        self.mode().is_persistent()
    }

    /// Number of status polls issued so far.
    pub fn poll_count(&self) -> u32 {
        self.record().poll_count
    }

    /// Snapshot of the payload the next call will send.
    pub fn request(&self) -> Value {
        self.record().request.clone()
    }

    /// Whether a poll is scheduled.
    pub fn has_pending_poll(&self) -> bool {
        self.record().pending_timer.is_some()
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record();
        f.debug_struct("QueueItem")
            .field("id", &self.inner.id)
            .field("report", &self.inner.report)
            .field("mode", &record.mode)
            .field("state", &record.state)
            .field("poll_count", &record.poll_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(mode: ItemMode) -> QueueItem {
        QueueItem::new(
            ItemId(7),
            "animation".into(),
            mode,
            json!({"report": "animation"}),
            Arc::new(|_| {}),
        )
    }

    #[test]
    fn test_mode_first_operation() {
        assert_eq!(
            ItemMode::PersistentStatus.first_operation(),
            Operation::RunStatus
        );
        assert_eq!(
            ItemMode::Persistent.first_operation(),
            Operation::RunSimulation
        );
        assert_eq!(
            ItemMode::Transient.first_operation(),
            Operation::RunSimulation
        );
    }

    #[test]
    fn test_mode_flags() {
        assert!(ItemMode::PersistentStatus.is_persistent());
        assert!(ItemMode::Persistent.is_persistent());
        assert!(!ItemMode::Transient.is_persistent());
        assert!(ItemMode::Persistent.force_run());
        assert!(!ItemMode::PersistentStatus.force_run());
        assert!(!ItemMode::Transient.force_run());
    }

    #[test]
    fn test_state_finished() {
        assert!(!ItemState::Pending.is_finished());
        assert!(!ItemState::Processing.is_finished());
        assert!(ItemState::Done.is_finished());
        assert!(ItemState::Removing.is_finished());
        assert!(ItemState::Canceled.is_finished());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::RunSimulation.to_string(), "runSimulation");
        assert_eq!(Operation::RunCancel.route(), "/run-cancel");
        assert_eq!(
            serde_json::to_value(Operation::RunStatus).unwrap(),
            json!("runStatus")
        );
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = item(ItemMode::PersistentStatus);
        assert_eq!(item.id().to_string(), "#7");
        assert_eq!(item.state(), ItemState::Pending);
        assert_eq!(item.first_operation(), Operation::RunStatus);
        assert_eq!(item.poll_count(), 0);
        assert!(item.is_persistent());
        assert!(!item.has_pending_poll());
    }

    #[test]
    fn test_clones_share_state() {
        let item = item(ItemMode::Transient);
        let other = item.clone();
        item.record().state = ItemState::Processing;
        assert_eq!(other.state(), ItemState::Processing);
    }
}
