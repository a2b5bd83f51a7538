//! Task functions and the catalog mapping task kinds to them.
//!
//! Functions are written against typed input and output; the catalog stores
//! them type-erased behind [`DynTaskFunction`] so the runtime can dispatch on
//! the kind string carried by each queue message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CatalogError, ExecutionFailure};

/// A unit of work that can be submitted by kind.
#[async_trait]
pub trait TaskFunction: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send;

    /// Kind string clients use to select this function.
    fn kind(&self) -> &'static str;

    async fn run(&self, input: Self::Input) -> Result<Self::Output, ExecutionFailure>;
}

/// Object-safe form of [`TaskFunction`] working on raw JSON.
#[async_trait]
pub trait DynTaskFunction: Send + Sync {
    fn kind(&self) -> &str;

    /// Decode `payload`, run, and encode the output. Decode and encode
    /// problems are reported as execution failures.
    async fn call(&self, payload: serde_json::Value) -> Result<serde_json::Value, ExecutionFailure>;
}

struct Erased<F: TaskFunction> {
    function: F,
}

#[async_trait]
impl<F: TaskFunction> DynTaskFunction for Erased<F> {
    fn kind(&self) -> &str {
        self.function.kind()
    }

    async fn call(&self, payload: serde_json::Value) -> Result<serde_json::Value, ExecutionFailure> {
        let input: F::Input = serde_json::from_value(payload)
            .map_err(|e| ExecutionFailure::new(format!("invalid payload: {e}")))?;
        let output = self.function.run(input).await?;
        serde_json::to_value(output)
            .map_err(|e| ExecutionFailure::new(format!("unserializable result: {e}")))
    }
}

/// Immutable-after-startup map from task kind to function.
///
/// Built once in the composition root and shared by the dispatcher (to
/// validate kinds) and the worker runtime (to execute them).
pub struct FunctionCatalog {
    functions: HashMap<String, Arc<dyn DynTaskFunction>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Catalog preloaded with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for function in super::builtin::all() {
            // Built-in kinds are distinct constants.
            catalog.functions.insert(function.kind().to_string(), function);
        }
        catalog
    }

    /// Register a function. Rejects a kind that is already taken.
    pub fn register<F: TaskFunction>(&mut self, function: F) -> Result<(), CatalogError> {
        let kind = function.kind().to_string();
        if self.functions.contains_key(&kind) {
            return Err(CatalogError::DuplicateKind(kind));
        }
        tracing::debug!(kind = %kind, "Registered task function");
        self.functions.insert(kind, erase(function));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn DynTaskFunction>> {
        self.functions.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.functions.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn erase<F: TaskFunction>(function: F) -> Arc<dyn DynTaskFunction> {
    Arc::new(Erased { function })
}
