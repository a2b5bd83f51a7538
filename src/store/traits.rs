//! `TaskRegistry` trait: the single source of truth for task state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RegistryError;
use crate::tasks::{TaskId, TaskRecord, TaskState, Transition};

/// Durable map from task id to its current lifecycle state.
///
/// Implementations must apply each transition atomically per id: when two
/// callers race on the same record, exactly one observes success and the
/// other gets `InvalidTransition`. A rejected transition leaves the record
/// untouched.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Insert a new `PENDING` record. Fails with `Conflict` if `id` exists.
    async fn create(
        &self,
        id: TaskId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<TaskRecord, RegistryError>;

    /// Move a record along the lifecycle and return the updated record.
    async fn transition(
        &self,
        id: TaskId,
        transition: Transition,
    ) -> Result<TaskRecord, RegistryError>;

    /// Fetch a record. Fails with `NotFound` if absent.
    async fn get(&self, id: TaskId) -> Result<TaskRecord, RegistryError>;

    /// Records in `state` last touched before `updated_before`, oldest first.
    ///
    /// Used by operators to find orphaned `PENDING` records and tasks left
    /// `RUNNING` by a crashed worker.
    async fn list_by_state(
        &self,
        state: TaskState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, RegistryError>;
}
