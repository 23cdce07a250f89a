//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Predefined graph shapes (chain, diamond, independent)
//! - Recording handlers that log invocation windows and peak concurrency

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use taskweave::orchestration::{StaticDecomposer, TaskHandler};
use taskweave::{HandlerError, Orchestrator, OrchestratorBuilder, Payload, TaskDescriptor};

/// A task whose input carries its own id, so recording handlers can tell
/// invocations apart.
pub fn task(id: &str, task_type: &str) -> TaskDescriptor {
    TaskDescriptor::new(id, task_type).input_value("task", id)
}

/// A task whose handler fails.
pub fn failing_task(id: &str, task_type: &str) -> TaskDescriptor {
    task(id, task_type).input_value("fail", true)
}

/// `n` tasks of one type with no dependencies: t0, t1, ...
pub fn independent_tasks(n: usize, task_type: &str) -> Vec<TaskDescriptor> {
    (0..n)
        .map(|i| task(&format!("t{}", i), task_type))
        .collect()
}

/// t0 → t1 → ... → t(n-1)
pub fn chain(n: usize, task_type: &str) -> Vec<TaskDescriptor> {
    (0..n)
        .map(|i| {
            let t = task(&format!("t{}", i), task_type);
            if i == 0 {
                t
            } else {
                t.depends_on([format!("t{}", i - 1)])
            }
        })
        .collect()
}

/// A → {B, C} → D, with `a` built by the caller so it can be made to fail.
pub fn diamond(a: TaskDescriptor, task_type: &str) -> Vec<TaskDescriptor> {
    vec![
        a,
        task("b", task_type).depends_on(["a"]),
        task("c", task_type).depends_on(["a"]),
        task("d", task_type).depends_on(["b", "c"]),
    ]
}

/// One handler invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub task: String,
    pub started: Instant,
    pub finished: Instant,
}

impl Call {
    pub fn overlaps(&self, other: &Call) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Shared log of handler invocations.
#[derive(Debug, Default)]
pub struct Recorder {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A handler that sleeps for `delay`, then returns `{"task": id}` or
    /// fails when the input has `"fail": true`.
    pub fn handler(self: &Arc<Self>, delay: Duration) -> impl TaskHandler + 'static {
        let recorder = Arc::clone(self);
        move |input: Payload| {
            let recorder = Arc::clone(&recorder);
            async move {
                let id = input
                    .get("task")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let started = Instant::now();
                let now_active = recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
                recorder.peak.fetch_max(now_active, Ordering::SeqCst);

                tokio::time::sleep(delay).await;

                recorder.active.fetch_sub(1, Ordering::SeqCst);
                recorder.calls.lock().unwrap().push(Call {
                    task: id.clone(),
                    started,
                    finished: Instant::now(),
                });

                if input.get("fail") == Some(&Value::Bool(true)) {
                    Err(HandlerError::new(format!("{} failed", id)))
                } else {
                    Ok(json!({ "task": id }))
                }
            }
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call(&self, task: &str) -> Call {
        self.calls()
            .into_iter()
            .find(|c| c.task == task)
            .unwrap_or_else(|| panic!("task {} was never invoked", task))
    }

    pub fn was_invoked(&self, task: &str) -> bool {
        self.calls().iter().any(|c| c.task == task)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// An orchestrator with one recording worker serving `task_types`.
pub fn single_worker(
    recorder: &Arc<Recorder>,
    task_types: &[&str],
    concurrency_limit: usize,
    delay: Duration,
) -> Orchestrator {
    OrchestratorBuilder::new()
        .add_worker(
            "worker",
            task_types.iter().copied(),
            concurrency_limit,
            recorder.handler(delay),
        )
        .build(StaticDecomposer::default())
        .expect("valid worker configuration")
}
