//! Task data model for the execution graph.
//!
//! A [`TaskDescriptor`] is what the decomposition step produces: an id, a
//! type used for routing, an opaque input payload and the ids it depends on.
//! A [`TaskState`] wraps a descriptor with the run-time status and result
//! that only the scheduler mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key-value payload handed to task handlers.
pub type Payload = serde_json::Map<String, Value>;

/// Identifier of a task, unique within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::borrow::Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One subtask as produced by decomposition.
///
/// Field names follow the decomposition wire shape (`type`, `dependsOn`);
/// the snake_case spellings are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, alias = "input_data")]
    pub input: Payload,
    #[serde(
        default,
        rename = "dependsOn",
        alias = "depends_on",
        alias = "dependencies"
    )]
    pub depends_on: Vec<TaskId>,
}

impl TaskDescriptor {
    /// Create a descriptor with an empty input and no dependencies.
    pub fn new(id: impl Into<TaskId>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            input: Payload::new(),
            depends_on: Vec::new(),
        }
    }

    /// Add a single input entry.
    pub fn input_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.input.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Task status in its lifecycle.
///
/// `Pending -> Queued -> Running -> Completed | Failed`, with
/// `Pending | Queued -> Blocked` when an ancestor fails or the run times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    /// Completed, Failed and Blocked are final for scheduling purposes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Why a task will never run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum BlockReason {
    /// An ancestor failed. `ancestor` is the task whose failure caused
    /// the block, even when the direct dependency was itself blocked.
    DependencyFailed { ancestor: TaskId },
    /// The run timed out before the task finished.
    Timeout,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::DependencyFailed { ancestor } => {
                write!(f, "dependency {} failed", ancestor)
            }
            BlockReason::Timeout => write!(f, "run timed out"),
        }
    }
}

/// Result recorded once a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TaskResult {
    Success(Value),
    Failure(Value),
    Blocked(BlockReason),
}

/// Run-time state of one task. Owned by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub descriptor: TaskDescriptor,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    /// Worker the task was routed to when it was queued.
    pub worker: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    /// Wrap a descriptor in a fresh Pending state.
    pub fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            descriptor,
            status: TaskStatus::Pending,
            result: None,
            worker: None,
            queued_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.descriptor.id
    }

    pub fn task_type(&self) -> &str {
        &self.descriptor.task_type
    }

    /// Transition Pending to Queued on the given worker's lane.
    pub fn queue(&mut self, worker: &str) {
        self.status = TaskStatus::Queued;
        self.worker = Some(worker.to_string());
        self.queued_at = Some(Utc::now());
    }

    /// Transition Queued to Running.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(TaskResult::Success(output));
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: Value) {
        self.status = TaskStatus::Failed;
        self.result = Some(TaskResult::Failure(error));
        self.finished_at = Some(Utc::now());
    }

    pub fn block(&mut self, reason: BlockReason) {
        self.status = TaskStatus::Blocked;
        self.result = Some(TaskResult::Blocked(reason));
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
