//! The simulation run queue.
//!
//! # Scheduling
//!
//! ```text
//!   add_persistent*_item() ──→ start immediately (any number concurrently)
//!   add_transient_item()   ──→ FIFO, one transient item processing at a time
//!
//!   start ──→ send(first op) ──→ "pending"/"running" ──→ sleep(max(1s, hint)) ──→ runStatus ──┐
//!                  │                     ▲                                                   │
//!                  │                     └───────────────────────────────────────────────────┘
//!                  └──→ terminal ──→ done ──→ removed ──→ onResponse ──→ next transient
//! ```
//!
//! Every state transition happens while the entries lock is held, and the
//! lock is never held across an `.await`. A response that comes back after
//! its item entered `Removing` is dropped without touching the item.
//!
//! Persistent items report every in-progress response to their handler.
//! Transient items report once, with the terminal response.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueResult, TransportResult};
use crate::item::{ItemId, ItemMode, ItemState, Operation, QueueItem, ResponseHandler};
use crate::response::RunResponse;
use crate::transport::{RunRequest, Transport};

/// Queued items indexed by id, in submission order.
#[derive(Default)]
struct Entries {
    order: VecDeque<ItemId>,
    items: FxHashMap<ItemId, QueueItem>,
}

impl Entries {
    fn push(&mut self, item: QueueItem) {
        self.order.push_back(item.id());
        self.items.insert(item.id(), item);
    }

    fn remove(&mut self, id: ItemId) -> Option<QueueItem> {
        let item = self.items.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|&queued| queued == id) {
            self.order.remove(pos);
        }
        Some(item)
    }

    fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn into_ordered(self) -> Vec<QueueItem> {
        let Entries { order, mut items } = self;
        order.into_iter().filter_map(|id| items.remove(&id)).collect()
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: QueueConfig,
    next_id: AtomicU64,
    entries: Mutex<Entries>,
}

/// Client-side dispatcher for simulation runs.
///
/// `RunQueue` is a cheap handle: clones share the same queue. All methods
/// spawn tokio tasks and MUST be called from within a Tokio runtime.
///
/// Response handlers run with no lock held and may call back into the
/// queue.
#[derive(Clone)]
pub struct RunQueue {
    shared: Arc<Shared>,
}

impl RunQueue {
    /// Create an empty queue sending through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Entries::default()),
            }),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Number of items in the queue.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queued items, in submission order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.entries().iter().cloned().collect()
    }

    /// Resume observing a job that may already be running.
    ///
    /// The first call is `runStatus`; every response is reported.
    pub fn add_persistent_status_item(
        &self,
        report: &str,
        models: &Value,
        on_response: impl Fn(RunResponse) + Send + Sync + 'static,
    ) -> QueueResult<QueueItem> {
        self.add(
            report,
            models,
            ItemMode::PersistentStatus,
            Arc::new(on_response),
        )
    }

    /// Start a job with `forceRun` and report every response.
    pub fn add_persistent_item(
        &self,
        report: &str,
        models: &Value,
        on_response: impl Fn(RunResponse) + Send + Sync + 'static,
    ) -> QueueResult<QueueItem> {
        self.add(report, models, ItemMode::Persistent, Arc::new(on_response))
    }

    /// Queue a job behind other transient jobs; only the terminal response
    /// is reported.
    pub fn add_transient_item(
        &self,
        report: &str,
        models: &Value,
        on_response: impl Fn(RunResponse) + Send + Sync + 'static,
    ) -> QueueResult<QueueItem> {
        self.add(report, models, ItemMode::Transient, Arc::new(on_response))
    }

    /// Cancel an item.
    ///
    /// The item is demoted to transient, a `runCancel` is sent if it was
    /// processing, and it is removed. Late responses are dropped.
    pub fn cancel_item(&self, item: &QueueItem) {
        let rerun = {
            let mut entries = self.entries();
            let mut record = item.record();
            if record.state == ItemState::Removing {
                debug!(item = %item.id(), report = item.report(), "cancel ignored, item already removed");
                return;
            }
            let was_persistent = record.mode.is_persistent();
            let was_processing = record.state == ItemState::Processing;
            record.mode = ItemMode::Transient;
            if was_processing {
                self.send_cancel(item, record.request.clone());
                record.state = ItemState::Canceled;
            }
            drop(record);

            info!(item = %item.id(), report = item.report(), was_processing, "cancel");
            self.remove_locked(&mut entries, item);
            was_processing && !was_persistent
        };

        if rerun {
            self.run_first_transient();
        }
    }

    /// Remove every transient item; persistent items keep running.
    pub fn cancel_transient_items(&self) {
        let mut entries = self.entries();
        let previous = mem::take(&mut *entries);

        let mut removed = 0usize;
        for item in previous.into_ordered() {
            if item.mode() == ItemMode::Transient {
                self.remove_locked(&mut entries, &item);
                removed += 1;
            } else {
                entries.push(item);
            }
        }

        info!(removed, kept = entries.len(), "canceled transient items");
    }

    /// Remove an item from the queue. Removing twice is a no-op.
    ///
    /// A processing transient item gets a `runCancel`, and the next queued
    /// transient item is started.
    pub fn remove_item(&self, item: &QueueItem) {
        let rerun = {
            let mut entries = self.entries();
            let was_persistent = item.is_persistent();
            let previous = self.remove_locked(&mut entries, item);
            previous == Some(ItemState::Processing) && !was_persistent
        };

        if rerun {
            self.run_first_transient();
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.shared
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add(
        &self,
        report: &str,
        models: &Value,
        mode: ItemMode,
        on_response: ResponseHandler,
    ) -> QueueResult<QueueItem> {
        let request = RunRequest::new(
            report,
            models,
            mode,
            self.shared.config.simulation_type.as_str(),
        )?
        .into_value()?;
        let id = ItemId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let item = QueueItem::new(id, report.to_string(), mode, request, on_response);

        let replaced_running_transient = {
            let mut entries = self.entries();
            let replaced: Vec<QueueItem> = entries
                .iter()
                .filter(|queued| queued.report() == report)
                .cloned()
                .collect();
            let mut replaced_running_transient = false;
            for old in &replaced {
                debug!(item = %old.id(), report, "replacing item with the same report");
                let was_persistent = old.is_persistent();
                let previous = self.remove_locked(&mut entries, old);
                replaced_running_transient |=
                    previous == Some(ItemState::Processing) && !was_persistent;
            }

            info!(item = %id, report, mode = %mode, "enqueue");
            entries.push(item.clone());
            if mode.is_persistent() {
                self.start(&item);
            }
            replaced_running_transient
        };

        if !mode.is_persistent() || replaced_running_transient {
            self.run_first_transient();
        }
        Ok(item)
    }

    /// Start the head-most transient item if it is still pending.
    fn run_first_transient(&self) {
        let entries = self.entries();
        let Some(head) = entries.iter().find(|item| !item.is_persistent()) else {
            return;
        };
        if head.state() == ItemState::Pending {
            self.start(head);
        }
    }

    /// Send the item's first request. Caller holds the entries lock.
    fn start(&self, item: &QueueItem) {
        let operation = item.first_operation();
        let request = {
            let mut record = item.record();
            record.cancel_timer();
            record.state = ItemState::Processing;
            record.request.clone()
        };
        debug!(item = %item.id(), report = item.report(), %operation, "start");

        let queue = self.clone();
        let item = item.clone();
        tokio::spawn(async move {
            let result = queue.shared.transport.send(operation, &request).await;
            queue.handle_result(&item, operation, result);
        });
    }

    fn schedule_poll(&self, item: &QueueItem, delay: Duration) -> JoinHandle<()> {
        let queue = self.clone();
        let item = item.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.poll(&item).await;
        })
    }

    async fn poll(&self, item: &QueueItem) {
        let (request, poll_count) = {
            let mut record = item.record();
            if record.state != ItemState::Processing {
                return;
            }
            record.pending_timer = None;
            record.poll_count += 1;
            (record.request.clone(), record.poll_count)
        };
        debug!(item = %item.id(), report = item.report(), poll_count, "poll");

        let result = self
            .shared
            .transport
            .send(Operation::RunStatus, &request)
            .await;
        self.handle_result(item, Operation::RunStatus, result);
    }

    fn handle_result(
        &self,
        item: &QueueItem,
        operation: Operation,
        result: TransportResult<RunResponse>,
    ) {
        let response = result.unwrap_or_else(|e| {
            warn!(
                item = %item.id(),
                report = item.report(),
                %operation,
                error = %e,
                retryable = e.is_transient(),
                "request failed"
            );
            RunResponse::from_transport_error(&e)
        });

        if response.state.is_in_progress() {
            self.handle_in_progress(item, response);
        } else {
            self.finalize(item, response);
        }
    }

    fn handle_in_progress(&self, item: &QueueItem, response: RunResponse) {
        let notify = {
            let _entries = self.entries();
            let mut record = item.record();
            if !accepts_response(item, record.state, &response) {
                return;
            }

            match &response.next_request {
                Some(next) => record.request = next.clone(),
                None => {
                    warn!(item = %item.id(), report = item.report(), "in-progress response without nextRequest");
                }
            }
            if record.pending_timer.is_none() {
                let delay = response.poll_delay(self.shared.config.min_poll_interval());
                debug!(
                    item = %item.id(),
                    report = item.report(),
                    state = %response.state,
                    ?delay,
                    "schedule poll"
                );
                record.pending_timer = Some(self.schedule_poll(item, delay));
            }
            record.mode.is_persistent()
        };

        if notify {
            item.notify(response);
        }
    }

    fn finalize(&self, item: &QueueItem, response: RunResponse) {
        {
            let mut entries = self.entries();
            let mut record = item.record();
            if !accepts_response(item, record.state, &response) {
                return;
            }
            record.state = ItemState::Done;
            drop(record);
            self.remove_locked(&mut entries, item);
        }

        info!(
            item = %item.id(),
            report = item.report(),
            state = %response.state,
            failed = response.state.is_error(),
            "finished"
        );
        item.notify(response);
        self.run_first_transient();
    }

    /// Move the item to `Removing` and out of the queue.
    ///
    /// Returns the state the item was in, or `None` if it was already
    /// removed.
    fn remove_locked(&self, entries: &mut Entries, item: &QueueItem) -> Option<ItemState> {
        let mut record = item.record();
        if record.state == ItemState::Removing {
            return None;
        }
        let previous = record.state;
        record.state = ItemState::Removing;
        record.cancel_timer();
        let cancel_request = (previous == ItemState::Processing && !record.mode.is_persistent())
            .then(|| record.request.clone());
        drop(record);

        if entries.remove(item.id()).is_none() {
            debug!(item = %item.id(), report = item.report(), "item was not queued");
        }
        debug!(item = %item.id(), report = item.report(), state = %previous, "removed");

        if let Some(request) = cancel_request {
            self.send_cancel(item, request);
        }
        Some(previous)
    }

    fn send_cancel(&self, item: &QueueItem, request: Value) {
        let transport = Arc::clone(&self.shared.transport);
        let id = item.id();
        let report = item.report().to_string();
        tokio::spawn(async move {
            if let Err(e) = transport.send(Operation::RunCancel, &request).await {
                warn!(item = %id, report = %report, error = %e, "runCancel failed");
            }
        });
    }
}

impl std::fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunQueue")
            .field("config", &self.shared.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Only a processing item may act on a response.
fn accepts_response(item: &QueueItem, state: ItemState, response: &RunResponse) -> bool {
    match state {
        ItemState::Processing => true,
        ItemState::Removing => {
            debug!(item = %item.id(), report = item.report(), state = %response.state, "dropping response for removed item");
            false
        }
        other => {
            error!(
                item = %item.id(),
                report = item.report(),
                item_state = %other,
                state = %response.state,
                "response for item that is not processing"
            );
            false
        }
    }
}
