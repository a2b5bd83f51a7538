//! Error types for taskgate.

use uuid::Uuid;

use crate::tasks::TaskState;

/// Errors from library entry points that span several components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Token issuance and verification errors.
///
/// Every verification failure collapses into `Unauthorized`; the reason is
/// kept for logs and the 401 body but callers never branch on it.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Token subject must not be empty")]
    InvalidSubject,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Task registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} already exists")]
    Conflict { id: Uuid },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskState,
        to: TaskState,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue closed")]
    Closed,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Submission errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Task function catalog errors, raised while building it at startup.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Task kind '{0}' is already registered")]
    DuplicateKind(String),
}

/// A task function fault. Recorded as the task's error, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionFailure(pub String);

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
