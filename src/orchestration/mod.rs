//! Orchestration layer for taskweave.
//!
//! Workers are registered once into an immutable [`WorkerRegistry`]; each
//! request is decomposed into a task graph and executed by its own [`Run`],
//! which dispatches ready tasks to worker lanes and hands the final task
//! table to the aggregator.

pub mod aggregator;
pub mod builder;
pub mod decomposer;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use aggregator::{collect, Outcome, RunReport, RunSummary};
pub use builder::{OrchestratorBuilder, OrchestratorConfig};
pub use decomposer::{
    decomposition_prompt, parse_decomposition, Decomposer, PromptDecomposer, StaticDecomposer,
};
pub use orchestrator::Orchestrator;
pub use registry::{RoutingPolicy, WorkerRegistry};
pub use scheduler::{Run, RunEvent, RunId, RunOptions};
pub use worker::{HandlerError, HandlerResult, TaskHandler, WorkerDescriptor};
