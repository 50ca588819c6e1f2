//! Fan-out/fan-in health collection.
//!
//! One task per instance, at most `workers` in flight. Every task resolves to
//! a `TaskOutcome`; failures and deadline overruns become `Unavailable` and
//! never reach the caller. Results are merged by input position, not by
//! completion order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::instance::{InstanceRecord, TaskOutcome};
use super::sampler;
use super::tunnel::{Connector, RemoteShell};
use crate::config::{DEFAULT_TASK_TIMEOUT_SECS, DEFAULT_WORKERS};
use crate::error::ConnectFailure;

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub workers: usize,
    /// Deadline for one instance, counted from when it gets a worker slot.
    pub task_timeout: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Dispatched,
    Connecting,
    Sampling,
    Succeeded,
    Failed,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Dispatched => "dispatched",
            TaskPhase::Connecting => "connecting",
            TaskPhase::Sampling => "sampling",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Sample every instance and return the same records with outcomes merged.
pub async fn collect<C: Connector>(
    connector: Arc<C>,
    mut instances: Vec<InstanceRecord>,
    options: &CollectOptions,
) -> Vec<InstanceRecord> {
    let workers = options.workers.max(1);
    let limit = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    info!(instances = instances.len(), workers, "collecting instance health");

    for (index, record) in instances.iter().enumerate() {
        let connector = connector.clone();
        let limit = limit.clone();
        let id = record.id.clone();
        let address = record.private_address.clone();
        let deadline = options.task_timeout;

        debug!(instance_id = %id, phase = %TaskPhase::Dispatched);
        tasks.spawn(async move {
            let _permit = match limit.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, TaskOutcome::unavailable("worker pool closed")),
            };

            let outcome = match tokio::time::timeout(
                deadline,
                run_task(connector.as_ref(), &id, address.as_deref()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        instance_id = %id,
                        secs = deadline.as_secs_f64(),
                        "health collection timed out"
                    );
                    debug!(instance_id = %id, phase = %TaskPhase::Failed);
                    TaskOutcome::unavailable(format!(
                        "timed out after {}s",
                        deadline.as_secs_f64()
                    ))
                }
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; instances.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(e) => warn!(error = %e, "health collection task aborted"),
        }
    }

    let mut unavailable = 0usize;
    for (record, outcome) in instances.iter_mut().zip(outcomes) {
        let outcome =
            outcome.unwrap_or_else(|| TaskOutcome::unavailable("collection task aborted"));
        if matches!(outcome, TaskOutcome::Unavailable { .. }) {
            unavailable += 1;
        }
        record.outcome = Some(outcome);
    }

    info!(
        sampled = instances.len() - unavailable,
        unavailable,
        "health collection finished"
    );
    instances
}

async fn run_task<C: Connector>(connector: &C, id: &str, address: Option<&str>) -> TaskOutcome {
    debug!(instance_id = %id, phase = %TaskPhase::Connecting);

    let Some(address) = address else {
        return failed(id, ConnectFailure::NoAddress);
    };

    let session = match connector.open(address).await {
        Ok(session) => session,
        Err(e) => return failed(id, e),
    };

    debug!(instance_id = %id, address = %address, phase = %TaskPhase::Sampling);
    let result = sampler::sample(&session).await;
    session.close().await;

    match result {
        Ok(sample) => {
            debug!(instance_id = %id, phase = %TaskPhase::Succeeded);
            TaskOutcome::Sampled(sample)
        }
        Err(e) => failed(id, e),
    }
}

fn failed(id: &str, error: impl fmt::Display) -> TaskOutcome {
    warn!(instance_id = %id, error = %error, "metrics not available");
    debug!(instance_id = %id, phase = %TaskPhase::Failed);
    TaskOutcome::unavailable(error)
}
