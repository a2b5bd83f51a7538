//! Operator view of the store: records stuck in a state, plus the backlog.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::store::{LibSqlBackend, TaskRegistry};
use crate::tasks::{TaskRecord, TaskState};

/// What `taskgate inspect` prints.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub state: TaskState,
    pub updated_before: DateTime<Utc>,
    /// Unclaimed messages in the namespace's durable queue.
    pub queue_depth: i64,
    pub tasks: Vec<TaskRecord>,
}

/// `now` minus `older_than_secs`, or `None` when that falls off the clock.
/// Negative ages count as zero.
pub fn stale_cutoff(now: DateTime<Utc>, older_than_secs: i64) -> Option<DateTime<Utc>> {
    let age = Duration::try_seconds(older_than_secs.max(0))?;
    now.checked_sub_signed(age)
}

/// Records in `state` last touched before `updated_before`, with the queue
/// backlog alongside.
pub async fn inspect(
    store: &LibSqlBackend,
    state: TaskState,
    updated_before: DateTime<Utc>,
) -> Result<Inspection> {
    let tasks = store.list_by_state(state, updated_before).await?;
    let queue_depth = store.queue_depth().await?;
    Ok(Inspection {
        state,
        updated_before,
        queue_depth,
        tasks,
    })
}
