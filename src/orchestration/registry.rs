//! Worker registry and routing.
//!
//! Maps task types to the workers able to execute them. Registration order
//! is significant: with the default [`RoutingPolicy::FirstRegistered`] every
//! task of a type goes to the first worker that declared it.

use crate::core::dag::TaskGraph;
use crate::error::{Error, Result};
use crate::orchestration::worker::WorkerDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a task is assigned when several workers share its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Always the earliest registered capable worker.
    #[default]
    FirstRegistered,
    /// Rotate over capable workers in registration order, per task type.
    RoundRobin,
}

impl std::fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingPolicy::FirstRegistered => write!(f, "first_registered"),
            RoutingPolicy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

/// Registered workers, indexed by capability.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerDescriptor>,
    /// Task type to worker positions, in registration order.
    by_type: HashMap<String, Vec<usize>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker.
    ///
    /// # Errors
    /// - `DuplicateWorkerName` if the name is taken
    /// - `InvalidConcurrencyLimit` / `EmptyCapabilities` from
    ///   [`WorkerDescriptor::validate`]
    pub fn register(&mut self, worker: WorkerDescriptor) -> Result<()> {
        worker.validate()?;
        if self.get(&worker.name).is_some() {
            return Err(Error::DuplicateWorkerName(worker.name));
        }

        let position = self.workers.len();
        for cap in &worker.capabilities {
            self.by_type.entry(cap.clone()).or_default().push(position);
        }
        self.workers.push(worker);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkerDescriptor> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// Workers in registration order.
    pub fn workers(&self) -> &[WorkerDescriptor] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Every task type some worker can execute, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let types: BTreeSet<&String> = self.by_type.keys().collect();
        types.into_iter().cloned().collect()
    }

    /// Workers able to execute `task_type`, in registration order.
    pub fn capable_workers(&self, task_type: &str) -> Vec<&WorkerDescriptor> {
        self.candidates(task_type)
            .iter()
            .map(|&i| &self.workers[i])
            .collect()
    }

    /// The worker the default policy picks for `task_type`.
    pub fn route(&self, task_type: &str) -> Option<&WorkerDescriptor> {
        self.candidates(task_type).first().map(|&i| &self.workers[i])
    }

    /// Check that every task type in the graph has a worker.
    ///
    /// # Errors
    /// `UnroutableTaskType` listing every offending type, sorted.
    pub fn validate_routable(&self, graph: &TaskGraph) -> Result<()> {
        let missing: Vec<String> = graph
            .task_types()
            .into_iter()
            .filter(|t| !self.by_type.contains_key(*t))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::UnroutableTaskType(missing))
        }
    }

    pub(crate) fn candidates(&self, task_type: &str) -> &[usize] {
        self.by_type
            .get(task_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-run assignment state. Round-robin cursors never outlive a run.
#[derive(Debug)]
pub(crate) struct Router {
    policy: RoutingPolicy,
    cursors: HashMap<String, usize>,
}

impl Router {
    pub(crate) fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            cursors: HashMap::new(),
        }
    }

    /// Pick the worker position for a task of `task_type`.
    pub(crate) fn assign(&mut self, registry: &WorkerRegistry, task_type: &str) -> Option<usize> {
        let candidates = registry.candidates(task_type);
        if candidates.is_empty() {
            return None;
        }
        match self.policy {
            RoutingPolicy::FirstRegistered => Some(candidates[0]),
            RoutingPolicy::RoundRobin => {
                let cursor = self.cursors.entry(task_type.to_string()).or_insert(0);
                let chosen = candidates[*cursor % candidates.len()];
                *cursor += 1;
                Some(chosen)
            }
        }
    }
}
