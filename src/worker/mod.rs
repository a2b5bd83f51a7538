//! Worker runtime: the task function catalog and the pool of units that
//! execute queued tasks.

pub mod builtin;
pub mod function;
pub mod pool;

pub use function::{DynTaskFunction, FunctionCatalog, TaskFunction};
pub use pool::{Disposition, WorkerPool, handle_message};
