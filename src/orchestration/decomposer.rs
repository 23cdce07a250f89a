//! Decomposition boundary.
//!
//! The engine does no reasoning of its own: a [`Decomposer`] turns the raw
//! request into task descriptors. [`PromptDecomposer`] wraps any text
//! completion function (typically an LLM call), sending it the request and
//! the list of routable task types and parsing the JSON it answers with.
//! A response that fails to parse in full rejects the run; no partial graph
//! is ever built.

use crate::core::task::{Payload, TaskDescriptor};
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::LazyLock;

/// Matches a fenced code block, optionally tagged `json`.
static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").unwrap());

/// Produces the task list for one request.
pub trait Decomposer: Send + Sync {
    /// `task_types` lists every type some registered worker can execute.
    fn decompose<'a>(
        &'a self,
        input: &'a Payload,
        task_types: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<TaskDescriptor>>>;
}

/// Returns the same task list for every request.
///
/// Used for plans that were decomposed ahead of time.
#[derive(Debug, Clone, Default)]
pub struct StaticDecomposer {
    tasks: Vec<TaskDescriptor>,
}

impl StaticDecomposer {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self { tasks }
    }

    /// Parse a plan in decomposition response format.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self::new(parse_decomposition(text)?))
    }
}

impl Decomposer for StaticDecomposer {
    fn decompose<'a>(
        &'a self,
        _input: &'a Payload,
        _task_types: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<TaskDescriptor>>> {
        let tasks = self.tasks.clone();
        Box::pin(async move { Ok(tasks) })
    }
}

/// Adapts a text completion function into a [`Decomposer`].
pub struct PromptDecomposer<F> {
    complete: F,
}

impl<F> PromptDecomposer<F> {
    pub fn new(complete: F) -> Self {
        Self { complete }
    }
}

impl<F, Fut, E> Decomposer for PromptDecomposer<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<String, E>> + Send,
    E: Display,
{
    fn decompose<'a>(
        &'a self,
        input: &'a Payload,
        task_types: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<TaskDescriptor>>> {
        Box::pin(async move {
            let prompt = decomposition_prompt(input, task_types)?;
            let response = (self.complete)(prompt)
                .await
                .map_err(|e| Error::Decomposition(format!("completion call failed: {}", e)))?;
            parse_decomposition(&response)
        })
    }
}

/// Build the instruction sent to the decomposition service.
pub fn decomposition_prompt(input: &Payload, task_types: &[String]) -> Result<String> {
    let mut types: Vec<&str> = task_types.iter().map(String::as_str).collect();
    types.sort_unstable();
    types.dedup();
    let request = serde_json::to_string_pretty(input)?;

    Ok(format!(
        "Decompose this task into smaller subtasks. For each subtask, specify:\n\
         1. A unique ID\n\
         2. The task type (one of: {types})\n\
         3. Input data\n\
         4. Dependencies (IDs of other subtasks that must finish first)\n\
         \n\
         Respond in JSON format:\n\
         {{\n  \"tasks\": [\n    {{\n      \"id\": \"task-1\",\n      \"type\": \"task_type\",\n      \
         \"input\": {{}},\n      \"dependsOn\": []\n    }}\n  ]\n}}\n\
         \n\
         Task to decompose:\n{request}",
        types = types.join(", "),
        request = request,
    ))
}

/// Parse a decomposition response.
///
/// Accepts `{"tasks": [...]}` or a bare array. Text that is not JSON as a
/// whole is searched for a fenced code block holding the JSON. Every
/// record must deserialize as a [`TaskDescriptor`] with a
/// non-empty id and type.
///
/// # Errors
/// `Decomposition` naming the first offending record.
pub fn parse_decomposition(text: &str) -> Result<Vec<TaskDescriptor>> {
    let value: Value = match serde_json::from_str(text.trim()) {
        Ok(value) => value,
        Err(whole) => {
            let fenced = FENCED_BLOCK_RE
                .captures(text)
                .and_then(|c| c.get(1))
                .ok_or_else(|| {
                    Error::Decomposition(format!("response is not valid JSON: {}", whole))
                })?;
            serde_json::from_str(fenced.as_str().trim()).map_err(|e| {
                Error::Decomposition(format!("response is not valid JSON: {}", e))
            })?
        }
    };

    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut obj) => match obj.remove("tasks") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(Error::Decomposition(
                    "response object has no `tasks` array".to_string(),
                ))
            }
        },
        _ => {
            return Err(Error::Decomposition(
                "response must be an object or an array".to_string(),
            ))
        }
    };

    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let task: TaskDescriptor = serde_json::from_value(record)
                .map_err(|e| Error::Decomposition(format!("task #{}: {}", i, e)))?;
            if task.id.as_str().trim().is_empty() {
                return Err(Error::Decomposition(format!("task #{}: empty id", i)));
            }
            if task.task_type.trim().is_empty() {
                return Err(Error::Decomposition(format!(
                    "task {}: empty type",
                    task.id
                )));
            }
            Ok(task)
        })
        .collect()
}
