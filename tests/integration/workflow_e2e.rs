//! End-to-end workflow tests.
//!
//! These run full requests through decomposition, dispatch and aggregation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use taskweave::orchestration::{PromptDecomposer, RunEvent, StaticDecomposer, TaskHandler};
use taskweave::{
    BlockReason, HandlerError, OrchestratorBuilder, Outcome, Payload, TaskDescriptor, TaskId,
    TaskStatus,
};

use crate::fixtures::{independent_tasks, single_worker, task, Recorder};

fn fixed(text: &'static str) -> impl TaskHandler + 'static {
    move |_input: Payload| async move { Ok::<_, HandlerError>(json!(text)) }
}

fn document_pipeline() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor::new("extract", "text_extraction").input_value("document", "report.pdf"),
        TaskDescriptor::new("summarize", "summarization").depends_on(["extract"]),
        TaskDescriptor::new("format", "formatting").depends_on(["summarize"]),
    ]
}

/// extract → summarize → format, each returning a fixed string
#[tokio::test]
async fn test_document_pipeline() {
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("extractor", ["text_extraction"], 1, fixed("raw text"))
        .add_worker("summarizer", ["summarization"], 1, fixed("short summary"))
        .add_worker("formatter", ["formatting"], 1, fixed("# Summary"))
        .build(StaticDecomposer::new(document_pipeline()))
        .unwrap();

    let report = orchestrator.execute(&Payload::new()).await.unwrap();

    let expected: BTreeMap<TaskId, Value> = [
        ("extract", "raw text"),
        ("summarize", "short summary"),
        ("format", "# Summary"),
    ]
    .into_iter()
    .map(|(id, text)| (TaskId::from(id), json!(text)))
    .collect();
    assert_eq!(report.completed_results(), expected);

    let extract = report.get(&TaskId::from("extract")).unwrap();
    let summarize = report.get(&TaskId::from("summarize")).unwrap();
    let format = report.get(&TaskId::from("format")).unwrap();
    assert!(summarize.started_at.unwrap() >= extract.finished_at.unwrap());
    assert!(format.started_at.unwrap() >= summarize.finished_at.unwrap());
    assert_eq!(summarize.worker.as_deref(), Some("summarizer"));
    assert!(report.finished_at >= report.started_at);
}

/// Aggregating the same report twice gives the same map
#[tokio::test]
async fn test_aggregation_is_idempotent() {
    let recorder = Recorder::new();
    let orchestrator = single_worker(&recorder, &["x"], 2, Duration::ZERO);

    let mut tasks = independent_tasks(3, "x");
    tasks.push(crate::fixtures::failing_task("bad", "x"));
    tasks.push(task("after", "x").depends_on(["bad"]));
    let report = orchestrator.execute_tasks(tasks).await.unwrap();

    let first = report.outcomes().unwrap();
    let second = report.outcomes().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

/// The event stream reports every transition and ends with RunFinished
#[tokio::test]
async fn test_event_stream() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let recorder = Recorder::new();
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("w", ["x"], 1, recorder.handler(Duration::ZERO))
        .events(tx)
        .build(StaticDecomposer::default())
        .unwrap();

    let report = orchestrator
        .execute_tasks(vec![
            crate::fixtures::failing_task("a", "x"),
            task("b", "x").depends_on(["a"]),
        ])
        .await
        .unwrap();
    drop(orchestrator);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let run_id = report.run_id;
    assert_eq!(
        events,
        vec![
            RunEvent::TaskQueued {
                run_id,
                task_id: "a".into(),
                worker: "w".into()
            },
            RunEvent::TaskStarted {
                run_id,
                task_id: "a".into(),
                worker: "w".into()
            },
            RunEvent::TaskFailed {
                run_id,
                task_id: "a".into(),
                error: json!({"error": "a failed"})
            },
            RunEvent::TaskBlocked {
                run_id,
                task_id: "b".into(),
                reason: BlockReason::DependencyFailed {
                    ancestor: "a".into()
                }
            },
            RunEvent::RunFinished { run_id },
        ]
    );
}

/// Concurrent runs sharing one sink can be told apart by run id
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_event_sink_separates_runs() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let recorder = Recorder::new();
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("w", ["x"], 2, recorder.handler(Duration::from_millis(10)))
        .events(tx)
        .build(StaticDecomposer::default())
        .unwrap();

    let plan = || vec![task("a", "x"), task("b", "x").depends_on(["a"])];
    let (first, second) = tokio::join!(
        orchestrator.execute_tasks(plan()),
        orchestrator.execute_tasks(plan())
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    drop(orchestrator);

    let mut per_run: BTreeMap<String, Vec<RunEvent>> = BTreeMap::new();
    while let Some(event) = rx.recv().await {
        per_run
            .entry(event.run_id().to_string())
            .or_default()
            .push(event);
    }

    assert_eq!(per_run.len(), 2);
    for run_id in [first.run_id, second.run_id] {
        let events = &per_run[&run_id.to_string()];
        let completed: Vec<&TaskId> = events
            .iter()
            .filter(|e| matches!(e, RunEvent::TaskCompleted { .. }))
            .filter_map(RunEvent::task_id)
            .collect();
        assert_eq!(completed, vec![&TaskId::from("a"), &TaskId::from("b")]);
        assert_eq!(events.len(), 7);
        assert_eq!(events.last(), Some(&RunEvent::RunFinished { run_id }));
    }
}

/// A run that outlives its timeout blocks what is left and still reports
#[tokio::test]
async fn test_run_timeout_blocks_unfinished_tasks() {
    let recorder = Recorder::new();
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("w", ["x"], 1, recorder.handler(Duration::from_millis(500)))
        .run_timeout(Duration::from_millis(50))
        .build(StaticDecomposer::default())
        .unwrap();

    let report = orchestrator
        .execute_tasks(vec![task("slow", "x"), task("next", "x").depends_on(["slow"])])
        .await
        .unwrap();

    assert!(report.timed_out);
    let outcomes = report.outcomes().unwrap();
    for id in ["slow", "next"] {
        assert_eq!(
            outcomes[&TaskId::from(id)],
            Outcome::Blocked {
                reason: BlockReason::Timeout
            }
        );
    }
    assert!(!recorder.was_invoked("next"));
}

/// Decomposition through a completion function, then execution
#[tokio::test]
async fn test_prompt_decomposition_end_to_end() {
    let orchestrator = OrchestratorBuilder::new()
        .add_worker("upper", ["shout"], 2, |input: Payload| async move {
            let text = input
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::new("missing text"))?;
            Ok::<_, HandlerError>(json!(text.to_uppercase()))
        })
        .build(PromptDecomposer::new(|prompt: String| async move {
            assert!(prompt.contains("shout"));
            Ok::<_, String>(
                "```json\n{\"tasks\": [\
                 {\"id\": \"one\", \"type\": \"shout\", \"input\": {\"text\": \"hello\"}},\
                 {\"id\": \"two\", \"type\": \"shout\", \"input\": {}, \"dependsOn\": [\"one\"]}\
                 ]}\n```"
                    .to_string(),
            )
        }))
        .unwrap();

    let mut request = Payload::new();
    request.insert("goal".to_string(), json!("shout hello"));
    let report = orchestrator.execute(&request).await.unwrap();

    let one = report.get(&TaskId::from("one")).unwrap();
    assert_eq!(one.status, TaskStatus::Completed);
    let outcomes = report.outcomes().unwrap();
    assert_eq!(outcomes[&TaskId::from("one")].output(), Some(&json!("HELLO")));
    assert_eq!(
        outcomes[&TaskId::from("two")],
        Outcome::Failed {
            error: json!({"error": "missing text"})
        }
    );
}
