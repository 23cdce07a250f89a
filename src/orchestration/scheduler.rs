//! Scheduler for dependency-gated parallel task execution.
//!
//! A [`Run`] owns the state of every task in one [`TaskGraph`] and one lane
//! per registered worker. Each lane is an unbounded queue served by exactly
//! `concurrency_limit` executors. The task table sits behind a single mutex:
//! every status transition, dependency release and failure propagation
//! happens while holding it, so two completions can never resolve
//! dependents from stale state.
//!
//! Dependency release uses a remaining-dependency counter per task. A task
//! is queued when its counter reaches zero; when a task fails every
//! non-terminal descendant is blocked on the spot. The run is finished once
//! every task is terminal, at which point the stop token is cancelled and
//! executors exit at their next wait for work.

use crate::core::dag::TaskGraph;
use crate::core::task::{BlockReason, Payload, TaskId, TaskResult, TaskState, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::aggregator::RunReport;
use crate::orchestration::registry::{Router, RoutingPolicy, WorkerRegistry};
use crate::orchestration::worker::{HandlerError, HandlerResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Unique identifier for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted by a run for task lifecycle changes.
///
/// These let callers (a CLI, a progress view, tests) follow a run without
/// polling the task table. Every event names its run, so one sink can be
/// shared by concurrent runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A task's dependencies are satisfied and it was pushed to a lane.
    TaskQueued {
        run_id: RunId,
        task_id: TaskId,
        worker: String,
    },
    /// An executor picked the task up and invoked the handler.
    TaskStarted {
        run_id: RunId,
        task_id: TaskId,
        worker: String,
    },
    TaskCompleted { run_id: RunId, task_id: TaskId },
    TaskFailed {
        run_id: RunId,
        task_id: TaskId,
        error: Value,
    },
    /// The task will never run.
    TaskBlocked {
        run_id: RunId,
        task_id: TaskId,
        reason: BlockReason,
    },
    /// Every task reached a terminal state.
    RunFinished { run_id: RunId },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::TaskQueued { run_id, .. }
            | RunEvent::TaskStarted { run_id, .. }
            | RunEvent::TaskCompleted { run_id, .. }
            | RunEvent::TaskFailed { run_id, .. }
            | RunEvent::TaskBlocked { run_id, .. }
            | RunEvent::RunFinished { run_id } => *run_id,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            RunEvent::TaskQueued { task_id, .. }
            | RunEvent::TaskStarted { task_id, .. }
            | RunEvent::TaskCompleted { task_id, .. }
            | RunEvent::TaskFailed { task_id, .. }
            | RunEvent::TaskBlocked { task_id, .. } => Some(task_id),
            RunEvent::RunFinished { .. } => None,
        }
    }
}

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub routing: RoutingPolicy,
    /// Upper bound on the whole run. On expiry every unfinished task is
    /// blocked with [`BlockReason::Timeout`].
    pub timeout: Option<Duration>,
    /// Event sink. The run releases its clones of the sender when it
    /// returns, even if timed-out handlers are still running.
    pub events: Option<mpsc::UnboundedSender<RunEvent>>,
}

/// One execution of the engine over one task graph.
pub struct Run {
    id: RunId,
    graph: Arc<TaskGraph>,
    registry: Arc<WorkerRegistry>,
    options: RunOptions,
}

impl Run {
    /// Prepare a run. The registry must already be validated against the
    /// graph (see [`WorkerRegistry::validate_routable`]).
    pub fn new(graph: TaskGraph, registry: Arc<WorkerRegistry>, options: RunOptions) -> Self {
        Self {
            id: RunId::new(),
            graph: Arc::new(graph),
            registry,
            options,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// Drive every task to a terminal state and return the final table.
    ///
    /// Handler failures never surface here; they are recorded per task.
    ///
    /// # Errors
    /// `UnroutableTaskType` if the registry cannot serve the graph and
    /// `Invariant` if the scheduler observes an impossible transition.
    pub async fn execute(self) -> Result<RunReport> {
        self.registry.validate_routable(&self.graph)?;

        let started_at = Utc::now();
        info!(
            run_id = %self.id,
            tasks = self.graph.len(),
            workers = self.registry.len(),
            depth = self.graph.depth(),
            "run started"
        );

        if self.graph.is_empty() {
            self.emit_finished();
            return Ok(RunReport::new(self.id, started_at, false, Vec::new()));
        }

        let (shared, receivers) = Shared::new(
            self.id,
            Arc::clone(&self.graph),
            Arc::clone(&self.registry),
            &self.options,
        );
        let shared = Arc::new(shared);

        shared.seed().await;

        let mut executors: Vec<JoinHandle<()>> = Vec::new();
        for (position, worker) in self.registry.workers().iter().enumerate() {
            for slot in 0..worker.concurrency_limit {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&receivers[position]);
                executors.push(tokio::spawn(lane_executor(shared, position, slot, rx)));
            }
        }

        let timed_out = match self.options.timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, shared.stop.cancelled())
                    .await
                    .is_err()
                {
                    shared.expire(limit).await
                } else {
                    false
                }
            }
            None => {
                shared.stop.cancelled().await;
                false
            }
        };

        if timed_out {
            // In-flight handlers are left to finish on their own; their
            // results are discarded.
            drop(executors);
        } else {
            for handle in executors {
                if let Err(e) = handle.await {
                    warn!(run_id = %self.id, error = %e, "lane executor ended abnormally");
                }
            }
        }

        let report = shared.conclude(started_at, timed_out).await?;
        let summary = report.summary();
        info!(
            run_id = %self.id,
            completed = summary.completed,
            failed = summary.failed,
            blocked = summary.blocked,
            "run finished"
        );
        self.emit_finished();
        Ok(report)
    }

    fn emit_finished(&self) {
        if let Some(tx) = &self.options.events {
            let _ = tx.send(RunEvent::RunFinished { run_id: self.id });
        }
    }
}

/// Mutable run state, guarded as a whole.
struct RunTable {
    /// Indexed by `NodeIndex::index()`.
    states: Vec<TaskState>,
    /// Dependencies of each task not yet completed.
    remaining: Vec<usize>,
    terminal: usize,
    router: Router,
    fault: Option<String>,
    /// Taken when the run concludes, so executors left behind by a timeout
    /// do not keep the caller's receiver open.
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl RunTable {
    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

type Lane = Arc<Mutex<mpsc::UnboundedReceiver<NodeIndex>>>;

struct Shared {
    run_id: RunId,
    graph: Arc<TaskGraph>,
    registry: Arc<WorkerRegistry>,
    table: Mutex<RunTable>,
    lanes: Vec<mpsc::UnboundedSender<NodeIndex>>,
    /// Cancelled once the run is over, for whatever reason.
    stop: CancellationToken,
}

impl Shared {
    /// Fresh table plus one lane per worker. The receivers are returned
    /// for the executors.
    fn new(
        run_id: RunId,
        graph: Arc<TaskGraph>,
        registry: Arc<WorkerRegistry>,
        options: &RunOptions,
    ) -> (Self, Vec<Lane>) {
        let states = graph.descriptors().cloned().map(TaskState::new).collect();
        let remaining = graph.node_indices().map(|i| graph.in_degree(i)).collect();

        let mut lanes = Vec::with_capacity(registry.len());
        let mut receivers = Vec::with_capacity(registry.len());
        for _ in registry.workers() {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.push(tx);
            receivers.push(Arc::new(Mutex::new(rx)));
        }

        let shared = Self {
            run_id,
            graph,
            registry,
            table: Mutex::new(RunTable {
                states,
                remaining,
                terminal: 0,
                router: Router::new(options.routing),
                fault: None,
                events: options.events.clone(),
            }),
            lanes,
            stop: CancellationToken::new(),
        };
        (shared, receivers)
    }

    /// Close the event sink and turn the final table into a report, or
    /// into `Invariant` if the run was aborted.
    async fn conclude(&self, started_at: DateTime<Utc>, timed_out: bool) -> Result<RunReport> {
        let mut table = self.table.lock().await;
        table.events = None;
        if let Some(fault) = table.fault.take() {
            error!(run_id = %self.run_id, fault = %fault, "run aborted");
            return Err(Error::Invariant(fault));
        }
        let states = std::mem::take(&mut table.states);
        Ok(RunReport::new(self.run_id, started_at, timed_out, states))
    }

    /// Queue every task without dependencies.
    async fn seed(&self) {
        let mut table = self.table.lock().await;
        let roots: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|i| table.remaining[i.index()] == 0)
            .collect();
        debug!(run_id = %self.run_id, roots = roots.len(), "seeding lanes");
        for index in roots {
            self.enqueue(&mut table, index);
        }
    }

    /// Pending -> Queued, then push onto the assigned worker's lane.
    fn enqueue(&self, table: &mut RunTable, index: NodeIndex) {
        let descriptor = self.graph.descriptor_at(index);
        let Some(position) = table.router.assign(&self.registry, &descriptor.task_type) else {
            self.abort(
                table,
                format!(
                    "task {} of type {} has no worker",
                    descriptor.id, descriptor.task_type
                ),
            );
            return;
        };
        let worker = &self.registry.workers()[position].name;

        table.states[index.index()].queue(worker);
        debug!(run_id = %self.run_id, task = %descriptor.id, worker = %worker, "task queued");
        table.emit(RunEvent::TaskQueued {
            run_id: self.run_id,
            task_id: descriptor.id.clone(),
            worker: worker.clone(),
        });

        if self.lanes[position].send(index).is_err() {
            self.abort(table, format!("lane for worker {} is closed", worker));
        }
    }

    /// Queued -> Running. Returns the input to hand to the worker, or
    /// `None` if the task must not start.
    async fn begin(&self, index: NodeIndex, position: usize) -> Option<Payload> {
        let mut table = self.table.lock().await;
        if self.stop.is_cancelled() {
            return None;
        }

        let worker = &self.registry.workers()[position].name;
        let state = &mut table.states[index.index()];
        match state.status {
            TaskStatus::Queued => {}
            // Blocked while it sat in the lane.
            TaskStatus::Blocked => return None,
            other => {
                let msg = format!("task {} pulled from lane while {}", state.id(), other);
                self.abort(&mut table, msg);
                return None;
            }
        }
        if state.worker.as_deref() != Some(worker.as_str()) {
            let msg = format!(
                "task {} routed to {:?} but pulled by {}",
                state.id(),
                state.worker,
                worker
            );
            self.abort(&mut table, msg);
            return None;
        }

        state.start();
        debug!(
            run_id = %self.run_id,
            task = %state.id(),
            task_type = %state.task_type(),
            worker = %worker,
            "task started"
        );
        let task_id = state.id().clone();
        let input = state.descriptor.input.clone();
        table.emit(RunEvent::TaskStarted {
            run_id: self.run_id,
            task_id,
            worker: worker.clone(),
        });
        Some(input)
    }

    /// Record a handler outcome and resolve the task's dependents.
    async fn finish(&self, index: NodeIndex, result: HandlerResult) {
        let mut table = self.table.lock().await;
        let i = index.index();

        if table.states[i].status != TaskStatus::Running {
            if table.states[i].result == Some(TaskResult::Blocked(BlockReason::Timeout)) {
                debug!(
                    run_id = %self.run_id,
                    task = %table.states[i].id(),
                    "discarding result that arrived after timeout"
                );
            } else {
                let msg = format!(
                    "task {} finished while {}",
                    table.states[i].id(),
                    table.states[i].status
                );
                self.abort(&mut table, msg);
            }
            return;
        }

        match result {
            Ok(output) => {
                let task_id = table.states[i].id().clone();
                table.states[i].complete(output);
                table.terminal += 1;
                debug!(run_id = %self.run_id, task = %task_id, "task completed");
                table.emit(RunEvent::TaskCompleted {
                    run_id: self.run_id,
                    task_id,
                });
                self.release_dependents(&mut table, index);
            }
            Err(err) => {
                let task_id = table.states[i].id().clone();
                let payload = err.to_payload();
                table.states[i].fail(payload.clone());
                table.terminal += 1;
                warn!(run_id = %self.run_id, task = %task_id, error = %err, "task failed");
                table.emit(RunEvent::TaskFailed {
                    run_id: self.run_id,
                    task_id,
                    error: payload,
                });
                self.block_descendants(&mut table, index);
            }
        }

        if table.terminal == table.states.len() {
            self.stop.cancel();
        }
    }

    /// Count down each dependent and queue the ones with nothing left to wait for.
    fn release_dependents(&self, table: &mut RunTable, index: NodeIndex) {
        for dependent in self.graph.dependent_indices(index) {
            let d = dependent.index();
            table.remaining[d] -= 1;
            if table.remaining[d] == 0 && table.states[d].status == TaskStatus::Pending {
                self.enqueue(table, dependent);
            }
        }
    }

    /// Block every unfinished descendant of a failed task.
    fn block_descendants(&self, table: &mut RunTable, failed: NodeIndex) {
        let ancestor = table.states[failed.index()].id().clone();
        let mut frontier: VecDeque<NodeIndex> = self.graph.dependent_indices(failed).into();

        while let Some(index) = frontier.pop_front() {
            let state = &mut table.states[index.index()];
            match state.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    let reason = BlockReason::DependencyFailed {
                        ancestor: ancestor.clone(),
                    };
                    state.block(reason.clone());
                    debug!(
                        run_id = %self.run_id,
                        task = %state.id(),
                        ancestor = %ancestor,
                        "task blocked"
                    );
                    let task_id = state.id().clone();
                    table.terminal += 1;
                    table.emit(RunEvent::TaskBlocked {
                        run_id: self.run_id,
                        task_id,
                        reason,
                    });
                    frontier.extend(self.graph.dependent_indices(index));
                }
                // Already blocked by another failed ancestor, and so are
                // its descendants.
                TaskStatus::Blocked => {}
                other => {
                    let msg = format!(
                        "descendant {} of failed task {} is {}",
                        state.id(),
                        ancestor,
                        other
                    );
                    self.abort(table, msg);
                    return;
                }
            }
        }
    }

    /// Block everything unfinished because the run ran out of time.
    /// Returns false if the run finished on its own in the meantime.
    async fn expire(&self, limit: Duration) -> bool {
        let mut table = self.table.lock().await;
        if self.stop.is_cancelled() {
            return false;
        }
        warn!(run_id = %self.run_id, timeout = ?limit, "run timed out");
        let mut blocked = Vec::new();
        for state in table.states.iter_mut().filter(|s| !s.is_terminal()) {
            state.block(BlockReason::Timeout);
            blocked.push(state.id().clone());
        }
        table.terminal = table.states.len();
        for task_id in blocked {
            table.emit(RunEvent::TaskBlocked {
                run_id: self.run_id,
                task_id,
                reason: BlockReason::Timeout,
            });
        }
        self.stop.cancel();
        true
    }

    /// Record an invariant violation and stop the run.
    fn abort(&self, table: &mut RunTable, msg: String) {
        error!(run_id = %self.run_id, "{}", msg);
        if table.fault.is_none() {
            table.fault = Some(msg);
        }
        self.stop.cancel();
    }
}

/// One executor of a worker's lane. Pulls one task at a time until the
/// run stops.
async fn lane_executor(
    shared: Arc<Shared>,
    position: usize,
    slot: usize,
    lane: Lane,
) {
    let worker = &shared.registry.workers()[position];
    debug!(run_id = %shared.run_id, worker = %worker.name, slot, "executor started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            next = async { lane.lock().await.recv().await } => next,
        };
        let Some(index) = next else { break };

        let Some(input) = shared.begin(index, position).await else {
            continue;
        };

        let handler = Arc::clone(&worker.handler);
        let result = AssertUnwindSafe(async move { handler.handle(input).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::new(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        shared.finish(index, result).await;
    }

    debug!(run_id = %shared.run_id, worker = %worker.name, slot, "executor stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
