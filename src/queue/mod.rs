//! Work queue: the handoff channel between the dispatcher and worker units.
//!
//! Every message is delivered to exactly one consumer. Delivery is
//! at-least-once from the runtime's point of view, so consumers must tolerate
//! seeing a message whose task has already moved on.

pub mod memory;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::tasks::TaskMessage;

pub use memory::MemoryQueue;

/// A claimed message. Hand it back to [`WorkQueue::ack`] once processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Backend-specific receipt identifying the claim.
    pub receipt: i64,
    pub message: TaskMessage,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message for some worker to pick up.
    async fn enqueue(&self, message: TaskMessage) -> Result<(), QueueError>;

    /// Wait until a message is available and claim it.
    ///
    /// There is no timeout; callers that need to stop waiting race this
    /// against their own shutdown signal.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a processed delivery so it is never handed out again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}
