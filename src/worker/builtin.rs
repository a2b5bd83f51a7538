//! Built-in task functions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::function::{DynTaskFunction, TaskFunction, erase};
use crate::error::ExecutionFailure;

/// Every built-in, ready for the catalog.
pub fn all() -> Vec<Arc<dyn DynTaskFunction>> {
    vec![erase(Add), erase(Divide)]
}

#[derive(Debug, Deserialize)]
pub struct AddInput {
    pub x: i64,
    pub y: i64,
    /// Simulated work time before answering.
    #[serde(default)]
    pub delay_ms: u64,
}

/// `add`: integer sum of `x` and `y`.
pub struct Add;

#[async_trait]
impl TaskFunction for Add {
    type Input = AddInput;
    type Output = i64;

    fn kind(&self) -> &'static str {
        "add"
    }

    async fn run(&self, input: AddInput) -> Result<i64, ExecutionFailure> {
        if input.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(input.delay_ms)).await;
        }
        input
            .x
            .checked_add(input.y)
            .ok_or_else(|| ExecutionFailure::new("integer overflow"))
    }
}

#[derive(Debug, Deserialize)]
pub struct DivideInput {
    pub x: f64,
    pub y: f64,
}

/// `divide`: `x / y` as a float. Fails on a zero divisor.
pub struct Divide;

#[async_trait]
impl TaskFunction for Divide {
    type Input = DivideInput;
    type Output = f64;

    fn kind(&self) -> &'static str {
        "divide"
    }

    async fn run(&self, input: DivideInput) -> Result<f64, ExecutionFailure> {
        if input.y == 0.0 {
            return Err(ExecutionFailure::new("division by zero"));
        }
        Ok(input.x / input.y)
    }
}
