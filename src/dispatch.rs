//! Submission path: validate, record, enqueue.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::queue::WorkQueue;
use crate::store::TaskRegistry;
use crate::tasks::{TaskId, TaskMessage};
use crate::worker::FunctionCatalog;

/// Accepts work requests and hands them to the worker runtime.
///
/// Submission returns as soon as the message is queued; it never waits on
/// execution.
pub struct Dispatcher {
    registry: Arc<dyn TaskRegistry>,
    queue: Arc<dyn WorkQueue>,
    catalog: Arc<FunctionCatalog>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        queue: Arc<dyn WorkQueue>,
        catalog: Arc<FunctionCatalog>,
    ) -> Self {
        Self {
            registry,
            queue,
            catalog,
        }
    }

    /// Submit `payload` for execution by the function registered as
    /// `task_kind`.
    ///
    /// The `PENDING` record is written before the message is enqueued. If the
    /// enqueue fails the record is left behind as an orphan and the error is
    /// returned; nothing rolls it back.
    pub async fn submit(
        &self,
        payload: serde_json::Value,
        task_kind: &str,
    ) -> Result<TaskId, DispatchError> {
        if !self.catalog.contains(task_kind) {
            return Err(DispatchError::UnknownTaskKind(task_kind.to_string()));
        }

        let id = Uuid::new_v4();
        self.registry.create(id, task_kind, payload.clone()).await?;

        let message = TaskMessage {
            task_id: id,
            task_kind: task_kind.to_string(),
            payload,
        };
        if let Err(e) = self.queue.enqueue(message).await {
            error!(
                task_id = %id,
                kind = task_kind,
                error = %e,
                "Enqueue failed; PENDING record is orphaned"
            );
            return Err(e.into());
        }

        info!(task_id = %id, kind = task_kind, "Task queued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::QueueError;
    use crate::queue::{Delivery, MemoryQueue};
    use crate::store::LibSqlBackend;
    use crate::tasks::TaskState;

    struct BrokenQueue;

    #[async_trait]
    impl WorkQueue for BrokenQueue {
        async fn enqueue(&self, _message: TaskMessage) -> Result<(), QueueError> {
            Err(QueueError::Closed)
        }
        async fn dequeue(&self) -> Result<Delivery, QueueError> {
            Err(QueueError::Closed)
        }
        async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
            Ok(())
        }
    }

    async fn setup() -> (Dispatcher, Arc<LibSqlBackend>, Arc<MemoryQueue>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&db) as Arc<dyn TaskRegistry>,
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
            Arc::new(FunctionCatalog::with_builtins()),
        );
        (dispatcher, db, queue)
    }

    #[tokio::test]
    async fn submit_records_pending_and_enqueues() {
        let (dispatcher, db, queue) = setup().await;
        let payload = json!({"x": 10, "y": 20});
        let id = dispatcher.submit(payload.clone(), "add").await.unwrap();

        let record = db.get(id).await.unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.kind, "add");

        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(
            delivery.message,
            TaskMessage {
                task_id: id,
                task_kind: "add".into(),
                payload,
            }
        );
    }

    #[tokio::test]
    async fn unknown_kind_writes_nothing() {
        let (dispatcher, db, queue) = setup().await;
        let err = dispatcher.submit(json!({}), "multiply").await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTaskKind(k) if k == "multiply"));

        assert!(queue.is_empty().await);
        let far_future = chrono::Utc::now() + chrono::Duration::days(1);
        assert!(db
            .list_by_state(TaskState::Pending, far_future)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_submissions_get_distinct_ids() {
        let (dispatcher, db, queue) = setup().await;
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for i in 0..20 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.submit(json!({"x": i, "y": i}), "add").await
            }));
        }

        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 20);
        assert_eq!(queue.len().await, 20);
        for id in ids {
            assert_eq!(db.get(id).await.unwrap().state, TaskState::Pending);
        }
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_orphaned_record() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Dispatcher::new(
            Arc::clone(&db) as Arc<dyn TaskRegistry>,
            Arc::new(BrokenQueue),
            Arc::new(FunctionCatalog::with_builtins()),
        );

        let err = dispatcher.submit(json!({"x": 1, "y": 2}), "add").await.unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::Closed)));

        let far_future = chrono::Utc::now() + chrono::Duration::days(1);
        let orphans = db
            .list_by_state(TaskState::Pending, far_future)
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, "add");
    }
}
