//! Core domain models for task orchestration.
//!
//! This module contains the task data model and the validated dependency
//! graph a run executes.

pub mod dag;
pub mod task;

pub use dag::TaskGraph;
pub use task::{BlockReason, Payload, TaskDescriptor, TaskId, TaskResult, TaskState, TaskStatus};
