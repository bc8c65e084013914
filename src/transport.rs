//! Transport trait and run request payloads.
//!
//! The [`Transport`] trait is the queue's only path to the compute service:
//!
//! ```text
//!   runSimulation ──→ runStatus ──→ runStatus ──→ ... ──→ terminal
//!     (or runStatus first for persistent-status items)
//!                           └──→ runCancel (best-effort)
//! ```
//!
//! ## Method table
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `send()` | async | yes | `TransportResult<RunResponse>` |

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{QueueError, QueueResult, TransportResult};
use crate::item::{ItemMode, Operation};
use crate::response::RunResponse;

/// Models key holding client-side run status, never sent to the server.
pub const SIMULATION_STATUS_KEY: &str = "simulationStatus";

/// Request/response channel to the compute service.
///
/// # Contract
///
/// - `send()` resolves once per call, with either a decoded response or an
///   error. The queue never retries.
/// - Responses to `runCancel` are ignored by the queue.
/// - `send()` MAY be called concurrently for different items.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a named operation with its payload.
    async fn send(&self, operation: Operation, request: &Value) -> TransportResult<RunResponse>;
}

/// Initial payload for an item's first call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Ask the server to rerun even if a result exists.
    pub force_run: bool,
    /// Deep copy of the caller's models.
    pub models: Value,
    /// Report key.
    pub report: String,
    /// Simulation the report belongs to.
    pub simulation_id: String,
    /// Application type of the simulation.
    pub simulation_type: String,
}

impl RunRequest {
    /// Build a request from caller models.
    ///
    /// The models are cloned, `simulationStatus` is dropped from the clone,
    /// and the simulation id is read from `models.simulation.simulationId`.
    pub fn new(
        report: impl Into<String>,
        models: &Value,
        mode: ItemMode,
        simulation_type: impl Into<String>,
    ) -> QueueResult<Self> {
        let mut models = models.clone();
        let map = models
            .as_object_mut()
            .ok_or_else(|| QueueError::InvalidModels("models must be a JSON object".into()))?;
        map.remove(SIMULATION_STATUS_KEY);

        let simulation_id = models
            .pointer("/simulation/simulationId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                QueueError::InvalidModels("models.simulation.simulationId is missing".into())
            })?
            .to_string();

        Ok(Self {
            force_run: mode.force_run(),
            models,
            report: report.into(),
            simulation_id,
            simulation_type: simulation_type.into(),
        })
    }

    /// Encode as the JSON payload the transport sends.
    pub fn into_value(self) -> QueueResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn models() -> Value {
        json!({
            "simulation": {"simulationId": "Xyz12", "name": "FODO"},
            "beam": {"energy": 1.5},
            "simulationStatus": {"animation": {"state": "running"}},
        })
    }

    #[test]
    fn test_request_strips_status() {
        let req = RunRequest::new("animation", &models(), ItemMode::Transient, "elegant").unwrap();
        assert_eq!(req.simulation_id, "Xyz12");
        assert!(req.models.get(SIMULATION_STATUS_KEY).is_none());
        assert_eq!(req.models["beam"]["energy"], 1.5);
        assert!(!req.force_run);
    }

    #[test]
    fn test_request_is_detached_from_caller() {
        let mut caller = models();
        let req = RunRequest::new("animation", &caller, ItemMode::Persistent, "elegant").unwrap();
        caller["beam"]["energy"] = json!(9.0);
        assert_eq!(req.models["beam"]["energy"], 1.5);
        assert!(caller.get(SIMULATION_STATUS_KEY).is_some());
        assert!(req.force_run);
    }

    #[test]
    fn test_request_wire_shape() {
        let value = RunRequest::new("beamReport", &models(), ItemMode::Persistent, "srw")
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(value["forceRun"], true);
        assert_eq!(value["report"], "beamReport");
        assert_eq!(value["simulationId"], "Xyz12");
        assert_eq!(value["simulationType"], "srw");
    }

    #[test]
    fn test_request_rejects_bad_models() {
        assert!(matches!(
            RunRequest::new("r", &json!([1, 2]), ItemMode::Transient, "srw"),
            Err(QueueError::InvalidModels(_))
        ));
        assert!(matches!(
            RunRequest::new("r", &json!({"simulation": {}}), ItemMode::Transient, "srw"),
            Err(QueueError::InvalidModels(_))
        ));
    }
}
