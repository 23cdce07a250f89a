//! Workers and the handler boundary.
//!
//! A worker is a named executor bound to one or more task types. Its
//! handler is opaque to the engine: it receives one task's input payload and
//! resolves to a success value or a [`HandlerError`]. Handlers are invoked
//! concurrently from several lane executors, so they must be `Send + Sync`.

use crate::core::task::Payload;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a single handler invocation.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Structured failure returned by a handler.
///
/// Recorded as the task's failure payload; it never aborts the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub details: Payload,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Payload::new(),
        }
    }

    /// Attach an extra field to the failure payload.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Failure payload: `{"error": message, ..details}`.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.details.clone();
        payload.insert("error".to_string(), Value::String(self.message.clone()));
        Value::Object(payload)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Domain logic that performs one subtask.
///
/// Implemented for every `Fn(Payload) -> impl Future<Output = HandlerResult>`,
/// so plain async closures can be registered directly.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, input: Payload) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, input: Payload) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(input))
    }
}

/// A registered worker.
#[derive(Clone)]
pub struct WorkerDescriptor {
    pub name: String,
    /// Task types this worker executes, in declaration order.
    pub capabilities: Vec<String>,
    /// Number of executors serving this worker's lane.
    pub concurrency_limit: usize,
    pub handler: Arc<dyn TaskHandler>,
}

impl WorkerDescriptor {
    /// Create a worker with a concurrency limit of 1.
    pub fn new<I, S, H>(name: impl Into<String>, capabilities: I, handler: H) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        H: TaskHandler + 'static,
    {
        Self::with_shared_handler(name, capabilities, Arc::new(handler))
    }

    /// Create a worker around a handler that is already shared.
    pub fn with_shared_handler<I, S>(
        name: impl Into<String>,
        capabilities: I,
        handler: Arc<dyn TaskHandler>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut caps: Vec<String> = Vec::new();
        for cap in capabilities {
            let cap = cap.into();
            if !caps.contains(&cap) {
                caps.push(cap);
            }
        }
        Self {
            name: name.into(),
            capabilities: caps,
            concurrency_limit: 1,
            handler,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_type)
    }

    /// Check the per-worker invariants.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(Error::InvalidConcurrencyLimit {
                worker: self.name.clone(),
            });
        }
        if self.capabilities.is_empty() {
            return Err(Error::EmptyCapabilities {
                worker: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}
