//! Persistence layer: the durable task registry and work queue on libSQL.

pub mod inspect;
pub mod libsql_backend;
pub mod libsql_queue;
pub mod migrations;
pub mod traits;

pub use inspect::{Inspection, inspect, stale_cutoff};
pub use libsql_backend::LibSqlBackend;
pub use traits::TaskRegistry;
