//! Durable `WorkQueue` on the same libSQL database as the registry.
//!
//! Messages are rows in `queue_messages`. A claim flips the oldest `ready`
//! row of the namespace to `claimed` in one `UPDATE … RETURNING`, so two
//! consumers (in this process or another) can never take the same row.
//! `ack` deletes the row.

use async_trait::async_trait;
use chrono::Utc;
use libsql::params;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DatabaseError, QueueError};
use crate::queue::{Delivery, WorkQueue};
use crate::store::libsql_backend::{LibSqlBackend, fmt_datetime};
use crate::tasks::TaskMessage;

impl LibSqlBackend {
    /// Claim the oldest ready message, if any, without waiting.
    pub async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let mut rows = self
            .conn()
            .query(
                "UPDATE queue_messages
                 SET status = 'claimed', claimed_at = ?1
                 WHERE seq = (
                     SELECT seq FROM queue_messages
                     WHERE namespace = ?2 AND status = 'ready'
                     ORDER BY seq ASC
                     LIMIT 1
                 )
                 RETURNING seq, task_id, task_kind, payload",
                params![fmt_datetime(Utc::now()), self.namespace()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim message: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("claim message: {e}")).into()),
        };

        let receipt: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Serialization(format!("queue_messages.seq: {e}")))?;
        let task_id: String = row
            .get(1)
            .map_err(|e| DatabaseError::Serialization(format!("queue_messages.task_id: {e}")))?;
        let task_kind: String = row
            .get(2)
            .map_err(|e| DatabaseError::Serialization(format!("queue_messages.task_kind: {e}")))?;
        let payload: String = row
            .get(3)
            .map_err(|e| DatabaseError::Serialization(format!("queue_messages.payload: {e}")))?;

        let message = TaskMessage {
            task_id: Uuid::parse_str(&task_id)
                .map_err(|e| DatabaseError::Serialization(format!("message {receipt}: {e}")))?,
            task_kind,
            payload: serde_json::from_str(&payload)
                .map_err(|e| DatabaseError::Serialization(format!("message {receipt}: {e}")))?,
        };

        debug!(receipt, task_id = %message.task_id, "Claimed queue message");
        Ok(Some(Delivery { receipt, message }))
    }

    /// Number of unclaimed messages in this namespace.
    pub async fn queue_depth(&self) -> Result<i64, QueueError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM queue_messages WHERE namespace = ?1 AND status = 'ready'",
                params![self.namespace()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue depth: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Serialization(format!("queue depth: {e}")))?),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("queue depth: {e}")).into()),
        }
    }
}

#[async_trait]
impl WorkQueue for LibSqlBackend {
    async fn enqueue(&self, message: TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&message.payload)
            .map_err(|e| DatabaseError::Serialization(format!("message payload: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO queue_messages (namespace, task_id, task_kind, payload, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    self.namespace(),
                    message.task_id.to_string(),
                    message.task_kind.as_str(),
                    payload,
                    fmt_datetime(Utc::now())
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("enqueue message: {e}")))?;

        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(delivery);
            }
            // Local enqueues wake us right away; rows written by other
            // processes are picked up on the next poll.
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.conn()
            .execute(
                "DELETE FROM queue_messages WHERE seq = ?1 AND namespace = ?2",
                params![delivery.receipt, self.namespace()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ack message: {e}")))?;
        Ok(())
    }
}
