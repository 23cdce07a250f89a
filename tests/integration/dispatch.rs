//! Dispatch correctness tests.
//!
//! These tests verify that ready tasks run in parallel up to each worker's
//! concurrency limit and never beyond it.

use std::time::Duration;

use taskweave::orchestration::StaticDecomposer;
use taskweave::{OrchestratorBuilder, RoutingPolicy, TaskStatus};

use crate::fixtures::{chain, independent_tasks, single_worker, task, Recorder};

const DELAY: Duration = Duration::from_millis(40);

/// Given a worker with concurrency limit 1 and two independent tasks
/// Then the second invocation never overlaps the first
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_limit_one_serializes_tasks() {
    let recorder = Recorder::new();
    let orchestrator = single_worker(&recorder, &["x"], 1, DELAY);

    let report = orchestrator
        .execute_tasks(independent_tasks(2, "x"))
        .await
        .unwrap();

    assert!(report.is_success());
    let (first, second) = (recorder.call("t0"), recorder.call("t1"));
    assert!(!first.overlaps(&second), "invocations must not overlap");
    assert_eq!(recorder.peak(), 1);
}

/// Given 6 independent tasks and a limit of 3
/// Then at most 3 handlers run at once, and more than one does
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_respects_limit() {
    let recorder = Recorder::new();
    let orchestrator = single_worker(&recorder, &["x"], 3, DELAY);

    let report = orchestrator
        .execute_tasks(independent_tasks(6, "x"))
        .await
        .unwrap();

    assert_eq!(report.summary().completed, 6);
    assert!(recorder.peak() <= 3, "peak was {}", recorder.peak());
    assert!(recorder.peak() > 1, "independent tasks should run in parallel");
}

/// Given workers with separate lanes
/// Then each lane's limit applies only to its own tasks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lanes_are_independent() {
    let recorder = Recorder::new();
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("slow", ["a"], 1, recorder.handler(DELAY))
        .add_worker("fast", ["b"], 1, recorder.handler(DELAY))
        .build(StaticDecomposer::default())
        .unwrap();

    orchestrator
        .execute_tasks(vec![task("a1", "a"), task("b1", "b")])
        .await
        .unwrap();

    assert!(recorder.call("a1").overlaps(&recorder.call("b1")));
}

/// Given a chain of tasks
/// Then each starts only after its predecessor finished
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chain_runs_in_order() {
    let recorder = Recorder::new();
    let orchestrator = single_worker(&recorder, &["x"], 4, Duration::from_millis(5));

    let report = orchestrator.execute_tasks(chain(5, "x")).await.unwrap();

    assert!(report.is_success());
    for i in 1..5 {
        let prev = recorder.call(&format!("t{}", i - 1));
        let next = recorder.call(&format!("t{}", i));
        assert!(next.started >= prev.finished);
    }
    assert_eq!(recorder.peak(), 1);
}

/// Given two capable workers
/// Then first-registered routing sends everything to the first
/// And round-robin alternates between them
#[tokio::test]
async fn test_routing_policies() {
    let recorder = Recorder::new();
    let build = |policy| {
        OrchestratorBuilder::new()
            .add_worker("first", ["x"], 2, recorder.handler(Duration::ZERO))
            .add_worker("second", ["x"], 2, recorder.handler(Duration::ZERO))
            .routing(policy)
            .build(StaticDecomposer::default())
            .unwrap()
    };

    let report = build(RoutingPolicy::FirstRegistered)
        .execute_tasks(independent_tasks(4, "x"))
        .await
        .unwrap();
    assert!(report
        .tasks
        .iter()
        .all(|t| t.worker.as_deref() == Some("first")));

    let report = build(RoutingPolicy::RoundRobin)
        .execute_tasks(independent_tasks(4, "x"))
        .await
        .unwrap();
    let on_second = report
        .tasks
        .iter()
        .filter(|t| t.worker.as_deref() == Some("second"))
        .count();
    assert_eq!(on_second, 2);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Completed));
}
