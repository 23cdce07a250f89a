//! The orchestrator: decompose, validate, run, aggregate.
//!
//! Every call to [`Orchestrator::execute`] creates a fresh [`Run`], so
//! concurrent requests against the same orchestrator share no task state.
//! Only the worker registry and decomposer are shared, and both are
//! immutable after construction.

use crate::core::dag::TaskGraph;
use crate::core::task::{Payload, TaskDescriptor};
use crate::error::{Error, Result};
use crate::orchestration::aggregator::RunReport;
use crate::orchestration::builder::OrchestratorBuilder;
use crate::orchestration::decomposer::Decomposer;
use crate::orchestration::registry::WorkerRegistry;
use crate::orchestration::scheduler::{Run, RunOptions};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Orchestrator {
    registry: Arc<WorkerRegistry>,
    decomposer: Arc<dyn Decomposer>,
    options: RunOptions,
}

impl Orchestrator {
    pub(crate) fn new(
        registry: Arc<WorkerRegistry>,
        decomposer: Arc<dyn Decomposer>,
        options: RunOptions,
    ) -> Self {
        Self {
            registry,
            decomposer,
            options,
        }
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Task types the decomposer may use.
    pub fn task_types(&self) -> Vec<String> {
        self.registry.task_types()
    }

    /// Decompose a request and validate the resulting graph against the
    /// registered workers, without executing anything.
    ///
    /// # Errors
    /// `Decomposition` if the decomposer fails, then any graph or routing
    /// error.
    pub async fn plan(&self, input: &Payload) -> Result<TaskGraph> {
        let task_types = self.registry.task_types();
        let tasks = self
            .decomposer
            .decompose(input, &task_types)
            .await
            .map_err(|e| match e {
                Error::Decomposition(_) => e,
                other => Error::Decomposition(other.to_string()),
            })?;
        info!(tasks = tasks.len(), "request decomposed");
        self.validate(tasks)
    }

    /// Build a graph from descriptors and check it is routable.
    pub fn validate(&self, tasks: Vec<TaskDescriptor>) -> Result<TaskGraph> {
        let graph = TaskGraph::build(tasks)?;
        self.registry.validate_routable(&graph)?;
        Ok(graph)
    }

    /// Decompose the request and execute it to completion.
    ///
    /// Always returns a per-task report once execution starts, even when
    /// tasks fail; only configuration and decomposition errors prevent one.
    pub async fn execute(&self, input: &Payload) -> Result<RunReport> {
        let graph = self.plan(input).await.inspect_err(|e| {
            warn!(error = %e, "request rejected before execution");
        })?;
        self.execute_graph(graph).await
    }

    /// Execute an already decomposed task list.
    pub async fn execute_tasks(&self, tasks: Vec<TaskDescriptor>) -> Result<RunReport> {
        let graph = self.validate(tasks)?;
        self.execute_graph(graph).await
    }

    pub async fn execute_graph(&self, graph: TaskGraph) -> Result<RunReport> {
        Run::new(graph, Arc::clone(&self.registry), self.options.clone())
            .execute()
            .await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
