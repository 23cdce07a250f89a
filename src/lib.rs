//! taskweave: a task-orchestration engine.
//!
//! A request is decomposed into a dependency graph of typed subtasks, each
//! subtask is routed to a registered worker that can execute its type, ready
//! tasks run concurrently within per-worker limits, and every task's final
//! outcome is collected into one report.

pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod log;
pub mod orchestration;

pub use crate::core::{
    BlockReason, Payload, TaskDescriptor, TaskGraph, TaskId, TaskResult, TaskState, TaskStatus,
};
pub use error::{Error, Result};
pub use orchestration::{
    HandlerError, Orchestrator, OrchestratorBuilder, Outcome, RoutingPolicy, RunReport,
    WorkerDescriptor,
};
