//! Task records, queue messages and the client-facing status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::TaskState;

/// Task identifiers are random v4 UUIDs assigned at submission.
pub type TaskId = Uuid;

/// The registry's stored view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: String,
    pub state: TaskState,
    pub payload: serde_json::Value,
    /// Present only in `SUCCESS`.
    pub result: Option<serde_json::Value>,
    /// Present only in `FAILURE`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh `PENDING` record.
    pub fn pending(id: TaskId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.into(),
            state: TaskState::Pending,
            payload,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Element handed from the dispatcher to the worker runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub task_kind: String,
    pub payload: serde_json::Value,
}

/// Normalized status returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

const PROGRESS_NOTE: &str = "Task is still running or pending";

impl StatusView {
    pub fn from_record(record: &TaskRecord) -> Self {
        let (result, error, progress) = match record.state {
            TaskState::Pending | TaskState::Running => {
                (None, None, Some(PROGRESS_NOTE.to_string()))
            }
            TaskState::Success => (record.result.clone(), None, None),
            TaskState::Failure => (None, record.error.clone(), None),
        };
        Self {
            task_id: record.id,
            state: record.state,
            result,
            error,
            progress,
        }
    }

    /// One-line human summary, e.g. `Task is in state: SUCCESS - Result: 30`.
    pub fn summary(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) => format!("Task is in state: {} - Result: {result}", self.state),
            (None, Some(error)) => format!("Task is in state: {} - Result: {error}", self.state),
            (None, None) => format!("Task is in state: {}", self.state),
        }
    }
}
