//! In-memory compute service driving a run queue.
//!
//! Submits one persistent-status item and two transient items against a
//! simulated service and prints every notification. Set `RUST_LOG` to
//! change the log level (default: `run_queue=debug`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use run_queue::{
    Operation, QueueConfig, RunQueue, RunResponse, RunState, Transport, TransportError,
    TransportResult,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Number of status polls a simulated job stays running for.
const RUN_STEPS: u32 = 3;

/// Simulated compute service keyed by report.
struct MockService {
    jobs: Mutex<HashMap<String, u32>>,
}

impl MockService {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Transport for MockService {
    async fn send(&self, operation: Operation, request: &Value) -> TransportResult<RunResponse> {
        let report = request["report"]
            .as_str()
            .ok_or_else(|| TransportError::api(400, "request has no report"))?
            .to_string();
        let mut jobs = self.jobs.lock().unwrap();

        if operation == Operation::RunCancel {
            jobs.remove(&report);
            return Ok(RunResponse::new(RunState::Canceled));
        }

        let remaining = jobs.entry(report.clone()).or_insert(RUN_STEPS);
        if *remaining == 0 {
            jobs.remove(&report);
            return Ok(RunResponse::new(RunState::Completed)
                .with_field("frameCount", json!(RUN_STEPS * 10)));
        }
        *remaining -= 1;

        Ok(RunResponse::in_progress(
            RunState::Running,
            json!({"report": report, "computeJobHash": format!("{report}-{remaining}")}),
            1.0,
        )
        .with_field("percentComplete", json!((RUN_STEPS - *remaining) * 100 / (RUN_STEPS + 1))))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("run_queue=debug")),
        )
        .init();

    let queue = RunQueue::new(Arc::new(MockService::new()), QueueConfig::new("elegant"));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let models = json!({
        "simulation": {"simulationId": "demo1", "name": "FODO lattice"},
        "bunch": {"n_particles_per_bunch": 5000},
    });

    for (report, persistent) in [
        ("animation", true),
        ("twissReport", false),
        ("bunchReport", false),
    ] {
        let tx = tx.clone();
        let handler = move |response: RunResponse| {
            let _ = tx.send((report, response));
        };
        if persistent {
            queue.add_persistent_status_item(report, &models, handler)?;
        } else {
            queue.add_transient_item(report, &models, handler)?;
        }
    }
    drop(tx);

    println!("Queued: {} items", queue.len());
    println!();

    let mut finished = 0;
    while let Some((report, response)) = rx.recv().await {
        let progress = response
            .extra
            .get("percentComplete")
            .map(|p| format!(" ({p}%)"))
            .unwrap_or_default();
        println!("{report:>12}: {}{progress}", response.state);
        if response.state.is_terminal() {
            finished += 1;
            if finished == 3 {
                break;
            }
        }
    }

    println!();
    println!("Remaining in queue: {}", queue.len());
    Ok(())
}
