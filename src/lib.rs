//! taskgate: authenticated asynchronous task execution.
//!
//! Clients obtain a signed token, submit work by kind, and poll for the
//! outcome while a pool of workers executes it out of band.

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod worker;
