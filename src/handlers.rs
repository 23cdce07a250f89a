//! Built-in handlers.
//!
//! Config files name handlers rather than embedding code, so the CLI
//! resolves those names through a [`HandlerCatalog`]. The built-ins are
//! small payload transforms, enough to exercise plans end to end.

use crate::core::task::Payload;
use crate::orchestration::worker::{HandlerError, HandlerResult, TaskHandler};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Name-keyed set of handlers.
#[derive(Clone, Default)]
pub struct HandlerCatalog {
    handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every built-in handler.
    pub fn builtin() -> Self {
        Self::new()
            .with("echo", echo)
            .with("uppercase", uppercase)
            .with("concat", concat)
            .with("fail", fail)
            .with("sleep", sleep)
    }

    /// Add or replace a handler.
    pub fn with<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: TaskHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("handlers", &self.names())
            .finish()
    }
}

async fn echo(input: Payload) -> HandlerResult {
    Ok(Value::Object(input))
}

async fn uppercase(input: Payload) -> HandlerResult {
    Ok(Value::Object(
        input
            .into_iter()
            .map(|(key, value)| (key, upper(value)))
            .collect(),
    ))
}

fn upper(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_uppercase()),
        Value::Array(items) => Value::Array(items.into_iter().map(upper).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, upper(v))).collect()),
        other => other,
    }
}

/// Joins top-level string values in key order.
async fn concat(input: Payload) -> HandlerResult {
    let text = input
        .values()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    Ok(serde_json::json!({ "text": text }))
}

async fn fail(input: Payload) -> HandlerResult {
    let message = input
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("task failed");
    Err(HandlerError::new(message))
}

async fn sleep(input: Payload) -> HandlerResult {
    let ms = match input.get("ms") {
        None => 0,
        Some(value) => value
            .as_u64()
            .ok_or_else(|| HandlerError::new("`ms` must be a non-negative integer"))?,
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(Value::Object(input))
}
