use crate::core::task::TaskId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Dependency cycle detected between tasks: {}", join_ids(.0))]
    CycleDetected(Vec<TaskId>),

    #[error("Duplicate worker name: {0}")]
    DuplicateWorkerName(String),

    #[error("Worker {worker} must have a concurrency limit of at least 1")]
    InvalidConcurrencyLimit { worker: String },

    #[error("Worker {worker} declares no capabilities")]
    EmptyCapabilities { worker: String },

    #[error("No worker registered for task type(s): {}", .0.join(", "))]
    UnroutableTaskType(Vec<String>),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("No home directory")]
    NoHomeDir,
}

impl Error {
    /// Errors that reject a run before any task executes because the
    /// graph or the worker set is unusable.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateTaskId(_)
                | Error::UnknownDependency { .. }
                | Error::CycleDetected(_)
                | Error::DuplicateWorkerName(_)
                | Error::InvalidConcurrencyLimit { .. }
                | Error::EmptyCapabilities { .. }
                | Error::UnroutableTaskType(_)
        )
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
