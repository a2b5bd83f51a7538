//! Read-only status lookups for clients.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::store::TaskRegistry;
use crate::tasks::{StatusView, TaskId};

pub struct StatusGateway {
    registry: Arc<dyn TaskRegistry>,
}

impl StatusGateway {
    pub fn new(registry: Arc<dyn TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Current normalized status of a task. Safe to call repeatedly.
    pub async fn status(&self, id: TaskId) -> Result<StatusView, RegistryError> {
        let record = self.registry.get(id).await?;
        Ok(StatusView::from_record(&record))
    }
}
