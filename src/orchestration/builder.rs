//! Orchestrator construction.
//!
//! Workers and run settings are collected into an [`OrchestratorConfig`]
//! value and validated once, when [`OrchestratorBuilder::build`] registers
//! them. The builder is consumed by every call, so no half-built state is
//! ever shared.

use crate::error::Result;
use crate::orchestration::decomposer::Decomposer;
use crate::orchestration::orchestrator::Orchestrator;
use crate::orchestration::registry::{RoutingPolicy, WorkerRegistry};
use crate::orchestration::scheduler::{RunEvent, RunOptions};
use crate::orchestration::worker::{TaskHandler, WorkerDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Everything an orchestrator needs besides its decomposer.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Workers in registration order.
    pub workers: Vec<WorkerDescriptor>,
    pub routing: RoutingPolicy,
    pub run_timeout: Option<Duration>,
}

/// Fluent construction of an [`Orchestrator`].
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .add_worker("extractor", ["text_extraction"], 2, extract)
///     .add_worker("summarizer", ["summarization"], 1, summarize)
///     .build(PromptDecomposer::new(llm_call))?;
/// let report = orchestrator.execute(&request).await?;
/// ```
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an assembled configuration.
    pub fn from_config(config: OrchestratorConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Add a worker executing `task_types` with up to `concurrency_limit`
    /// handler invocations at once.
    pub fn add_worker<I, S, H>(
        self,
        name: impl Into<String>,
        task_types: I,
        concurrency_limit: usize,
        handler: H,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        H: TaskHandler + 'static,
    {
        self.worker(
            WorkerDescriptor::new(name, task_types, handler)
                .with_concurrency_limit(concurrency_limit),
        )
    }

    pub fn worker(mut self, worker: WorkerDescriptor) -> Self {
        self.config.workers.push(worker);
        self
    }

    pub fn routing(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing = policy;
        self
    }

    /// Bound the duration of every run.
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_timeout = Some(timeout);
        self
    }

    /// Receive lifecycle events from every run.
    pub fn events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate the workers and build the orchestrator.
    ///
    /// # Errors
    /// `DuplicateWorkerName`, `InvalidConcurrencyLimit` or
    /// `EmptyCapabilities` for the first offending worker.
    pub fn build<D>(self, decomposer: D) -> Result<Orchestrator>
    where
        D: Decomposer + 'static,
    {
        let mut registry = WorkerRegistry::new();
        for worker in self.config.workers {
            registry.register(worker)?;
        }
        debug!(
            workers = registry.len(),
            routing = %self.config.routing,
            "orchestrator configured"
        );

        let options = RunOptions {
            routing: self.config.routing,
            timeout: self.config.run_timeout,
            events: self.events,
        };
        Ok(Orchestrator::new(
            Arc::new(registry),
            Arc::new(decomposer),
            options,
        ))
    }
}
