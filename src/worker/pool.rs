//! Fixed-size pool of worker units.
//!
//! Each unit loops: dequeue one message, claim the task (`RUNNING`), run the
//! function registered for its kind, record `SUCCESS` or `FAILURE`, then
//! acknowledge the message. Function faults, including panics, end up as
//! `FAILURE` and never take a unit down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::function::FunctionCatalog;
use crate::error::{QueueError, RegistryError};
use crate::queue::WorkQueue;
use crate::store::TaskRegistry;
use crate::tasks::{TaskId, TaskMessage, TaskRecord, Transition};

/// Pause after a failed dequeue before trying again.
const DEQUEUE_BACKOFF: Duration = Duration::from_millis(500);

/// Pause before the second attempt at writing a task's outcome.
const OUTCOME_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What a unit did with one message.
#[derive(Debug)]
pub enum Disposition {
    Succeeded,
    Failed(String),
    /// The claim was refused by the registry; nothing was executed.
    Discarded(RegistryError),
}

/// Handle to a running pool.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` units sharing the given queue, registry and catalog.
    pub fn spawn(
        size: usize,
        queue: Arc<dyn WorkQueue>,
        registry: Arc<dyn TaskRegistry>,
        catalog: Arc<FunctionCatalog>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(size);
        for unit in 0..size {
            let queue = Arc::clone(&queue);
            let registry = Arc::clone(&registry);
            let catalog = Arc::clone(&catalog);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                unit_loop(unit, queue, registry, catalog, &mut rx).await;
            }));
        }

        info!(size, "Worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Stop taking new messages. In-flight executions run to completion.
    pub fn request_shutdown(&self) {
        // Receivers may already be gone.
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait for every unit to exit.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "Worker unit ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn unit_loop(
    unit: usize,
    queue: Arc<dyn WorkQueue>,
    registry: Arc<dyn TaskRegistry>,
    catalog: Arc<FunctionCatalog>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(unit, "Worker unit started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let delivery = tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped pool handle also stops the unit.
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = queue.dequeue() => delivery,
        };

        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(QueueError::Closed) => break,
            Err(e) => {
                warn!(unit, error = %e, "Dequeue failed, backing off");
                tokio::time::sleep(DEQUEUE_BACKOFF).await;
                continue;
            }
        };

        handle_message(registry.as_ref(), &catalog, &delivery.message).await;

        if let Err(e) = queue.ack(&delivery).await {
            error!(
                unit,
                task_id = %delivery.message.task_id,
                receipt = delivery.receipt,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
    debug!(unit, "Worker unit stopped");
}

/// Process one message through the lifecycle and report what happened.
pub async fn handle_message(
    registry: &dyn TaskRegistry,
    catalog: &FunctionCatalog,
    message: &TaskMessage,
) -> Disposition {
    let id = message.task_id;
    let kind = message.task_kind.as_str();

    if let Err(e) = registry.transition(id, Transition::Start).await {
        // A refused claim means the message is stale or duplicated, or the
        // record never made it into the registry. Either way it is dropped.
        error!(
            task_id = %id,
            kind,
            error = %e,
            "Registry refused claim; discarding message"
        );
        return Disposition::Discarded(e);
    }
    info!(task_id = %id, kind, "Task started");

    let outcome = match catalog.get(kind) {
        Some(function) => {
            match AssertUnwindSafe(function.call(message.payload.clone()))
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(failure)) => Err(failure.0),
                Err(cause) => Err(format!("task panicked: {}", panic_message(cause.as_ref()))),
            }
        }
        None => Err(format!("unknown task kind: {kind}")),
    };

    let transition = match outcome {
        Ok(value) => Transition::Succeed(value),
        Err(reason) => Transition::Fail(reason),
    };

    match record_outcome(registry, id, transition).await {
        Ok(record) => match record.error {
            Some(reason) => {
                warn!(task_id = %id, kind, state = %record.state, error = %reason, "Task failed");
                Disposition::Failed(reason)
            }
            None => {
                info!(task_id = %id, kind, state = %record.state, "Task finished");
                Disposition::Succeeded
            }
        },
        Err(e) => {
            error!(
                task_id = %id,
                kind,
                error = %e,
                "Could not record task outcome; task left RUNNING"
            );
            Disposition::Failed(format!("could not record outcome: {e}"))
        }
    }
}

/// Write a terminal transition. A database error is retried once; a result
/// that still cannot be stored is replaced by a failure, so the task does not
/// stay `RUNNING` because its output was unwritable.
async fn record_outcome(
    registry: &dyn TaskRegistry,
    id: TaskId,
    transition: Transition,
) -> Result<TaskRecord, RegistryError> {
    let mut written = registry.transition(id, transition.clone()).await;
    if let Err(RegistryError::Database(e)) = &written {
        warn!(task_id = %id, error = %e, "Retrying task outcome write");
        tokio::time::sleep(OUTCOME_RETRY_DELAY).await;
        written = registry.transition(id, transition.clone()).await;
    }

    match (written, transition) {
        (Err(RegistryError::Database(e)), Transition::Succeed(_)) => {
            warn!(task_id = %id, error = %e, "Result not stored; failing task instead");
            registry
                .transition(id, Transition::Fail(format!("could not record result: {e}")))
                .await
        }
        (written, _) => written,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
