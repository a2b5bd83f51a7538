//! In-process queue for single-process deployments and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, WorkQueue};
use crate::error::QueueError;
use crate::tasks::TaskMessage;

/// FIFO queue guarded by a mutex, with a `Notify` to wake blocked consumers.
///
/// A message leaves the deque the moment it is claimed, so `ack` has nothing
/// left to do.
pub struct MemoryQueue {
    ready: Mutex<VecDeque<TaskMessage>>,
    notify: Notify,
    next_receipt: AtomicI64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            next_receipt: AtomicI64::new(1),
        }
    }

    /// Number of messages waiting to be claimed.
    pub async fn len(&self) -> usize {
        self.ready.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<(), QueueError> {
        self.ready.lock().await.push_back(message);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(message) = self.ready.lock().await.pop_front() {
                let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed);
                return Ok(Delivery { receipt, message });
            }
            // notify_one stores a permit when nobody is waiting, so an
            // enqueue landing between the check and here is not lost.
            self.notify.notified().await;
        }
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }
}
