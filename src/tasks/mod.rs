//! Task lifecycle model: states, records, queue messages, status views.

pub mod model;
pub mod state;

pub use model::{StatusView, TaskId, TaskMessage, TaskRecord};
pub use state::{TaskState, Transition};
