//! Result aggregation.
//!
//! Turns the final task table of a run into the per-task outcome map the
//! caller receives. Aggregation is read-only, so it can be repeated on the
//! same report and always yields the same map.

use crate::core::task::{BlockReason, TaskId, TaskResult, TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::scheduler::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Final outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    Completed {
        output: Value,
    },
    Failed {
        error: Value,
    },
    Blocked {
        #[serde(flatten)]
        reason: BlockReason,
    },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// The success payload, if the task completed.
    pub fn output(&self) -> Option<&Value> {
        match self {
            Outcome::Completed { output } => Some(output),
            _ => None,
        }
    }
}

/// Collect the outcome of every task, keyed by id.
///
/// # Errors
/// `Invariant` if a task is not terminal or its result does not match its
/// status; a finished run never produces such a table.
pub fn collect(tasks: &[TaskState]) -> Result<BTreeMap<TaskId, Outcome>> {
    tasks
        .iter()
        .map(|task| Ok((task.id().clone(), outcome_of(task)?)))
        .collect()
}

fn outcome_of(task: &TaskState) -> Result<Outcome> {
    match (task.status, &task.result) {
        (TaskStatus::Completed, Some(TaskResult::Success(output))) => Ok(Outcome::Completed {
            output: output.clone(),
        }),
        (TaskStatus::Failed, Some(TaskResult::Failure(error))) => Ok(Outcome::Failed {
            error: error.clone(),
        }),
        (TaskStatus::Blocked, Some(TaskResult::Blocked(reason))) => Ok(Outcome::Blocked {
            reason: reason.clone(),
        }),
        (status, result) => Err(Error::Invariant(format!(
            "task {} is {} with result {:?}",
            task.id(),
            status,
            result
        ))),
    }
}

/// Counts of terminal states in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// Final state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the run hit its timeout before every task finished.
    pub timed_out: bool,
    /// Task states in the order the tasks were supplied.
    pub tasks: Vec<TaskState>,
}

impl RunReport {
    pub fn new(
        run_id: RunId,
        started_at: DateTime<Utc>,
        timed_out: bool,
        tasks: Vec<TaskState>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            timed_out,
            tasks,
        }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Per-task outcome map. See [`collect`].
    pub fn outcomes(&self) -> Result<BTreeMap<TaskId, Outcome>> {
        collect(&self.tasks)
    }

    /// Success payloads of completed tasks only.
    pub fn completed_results(&self) -> BTreeMap<TaskId, Value> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.result {
                Some(TaskResult::Success(output)) => Some((t.id().clone(), output.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.tasks.len(),
            ..RunSummary::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Blocked => summary.blocked += 1,
                _ => {}
            }
        }
        summary
    }

    /// True when every task completed.
    pub fn is_success(&self) -> bool {
        self.summary().completed == self.tasks.len()
    }
}
