//! End-to-end runs of the engine over in-memory parts.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{PolicyDecision, PolicyGate};
use crate::ambiance::ExecutionMetadata;
use crate::core::{event_names, SkipType, Status};
use crate::dispatch::InMemoryWorkerTransport;
use crate::errors::{EngineError, PlanCreationError};
use crate::execution::{ExecutionStore, NodeExecution};
use crate::interrupts::{InterruptConfig, InterruptOutcome, InterruptRequest, InterruptType};
use crate::steps::{StepExecutable, StepRegistry, CHILD_EXECUTION_ID};
use crate::testing::{
    assert_all_terminal, assert_node_status, latest_attempt, parallel, pipeline, stage, step,
    with_failure_strategy, BlockingSyncStep, EngineHarness, ManualAsyncStep, RecordingSyncStep,
};
use crate::utils::now_utc;

fn echo(identifier: &str) -> Value {
    step(identifier, "Echo", json!({ "message": identifier }))
}

fn node<'a>(nodes: &'a [NodeExecution], identifier: &str) -> &'a NodeExecution {
    latest_attempt(nodes, identifier)
        .unwrap_or_else(|| panic!("no node execution '{identifier}'"))
}

fn manual_harness() -> (EngineHarness, Arc<ManualAsyncStep>) {
    let manual = Arc::new(ManualAsyncStep::new());
    let step_type = StepExecutable::Async(manual.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Manual", step_type));
    (harness, manual)
}

fn child_pipeline_stage(identifier: &str, child: Value) -> Value {
    let inner = child.get("pipeline").cloned().unwrap_or(Value::Null);
    json!({"stage": {
        "identifier": identifier,
        "type": "Pipeline",
        "spec": {"pipeline": inner, "inputs": {}}
    }})
}

fn blocking_harness() -> (EngineHarness, Arc<BlockingSyncStep>) {
    let blocking = Arc::new(BlockingSyncStep::new());
    let step_type = StepExecutable::Sync(blocking.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Block", step_type));
    (harness, blocking)
}

fn started_execution(harness: &EngineHarness) -> Uuid {
    harness.events.execution_ids(event_names::PLAN_STARTED)[0]
}

async fn child_execution_of(harness: &EngineHarness, stage: &NodeExecution) -> Uuid {
    let value = harness
        .store
        .get_output(stage.uuid, CHILD_EXECUTION_ID)
        .await
        .unwrap()
        .expect("child execution id published");
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_sync_chain_runs_in_order() {
    let harness = EngineHarness::new();
    let definition = pipeline("p", vec![stage("s1", vec![echo("a"), echo("b"), echo("c")])]);

    let exec = harness.start(&definition).await.unwrap();

    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
    let nodes = harness.nodes(exec).await;
    assert_all_terminal(&nodes);
    let a = node(&nodes, "a");
    let b = node(&nodes, "b");
    let c = node(&nodes, "c");
    assert!(a.sequence < b.sequence && b.sequence < c.sequence);
    assert_eq!(b.previous_id, Some(a.uuid));
    assert_eq!(c.previous_id, Some(b.uuid));
    assert_eq!(a.parent_id, b.parent_id);
    assert_eq!(b.outcome, Some(json!({"message": "b"})));
}

#[tokio::test]
async fn test_events_cover_node_and_plan_lifecycle() {
    let harness = EngineHarness::new();
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![echo("a")])]))
        .await
        .unwrap();
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));

    let names: Vec<String> = harness.events.events().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names.first().map(String::as_str), Some(event_names::PLAN_STARTED));
    assert_eq!(names.last().map(String::as_str), Some(event_names::PLAN_CONCLUDED));
    assert!(names.iter().any(|n| n == event_names::NODE_CREATED));
    assert!(names.iter().any(|n| n == event_names::NODE_CONCLUDED));
}

#[tokio::test]
async fn test_failure_without_strategy_ends_chain() {
    let failing = Arc::new(RecordingSyncStep::new(json!({})).always_failing());
    let step_type = StepExecutable::Sync(failing.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![step("a", "Flaky", json!({})), echo("b")])],
    );

    let exec = harness.start(&definition).await.unwrap();

    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "a", Status::Failed);
    assert!(latest_attempt(&nodes, "b").is_none());
    assert_eq!(harness.execution_status(exec).await, Some(Status::Failed));
    assert!(node(&nodes, "a").failure_message.is_some());
}

#[tokio::test]
async fn test_async_step_resumes_on_task_completion() {
    let harness = EngineHarness::new();
    let definition = pipeline(
        "p",
        vec![stage(
            "s1",
            vec![step("build", "ShellScript", json!({"script": "make"})), echo("after")],
        )],
    );

    let exec = harness.start(&definition).await.unwrap();
    assert_eq!(harness.execution_status(exec).await, Some(Status::Running));
    assert_node_status(&harness.nodes(exec).await, "build", Status::AsyncWaiting);

    let tasks = harness.transport.pending_tasks();
    assert_eq!(tasks.len(), 1);
    assert!(harness
        .complete_task(&tasks[0], json!({"artifact": "app.tar"}))
        .await
        .unwrap());

    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "build", Status::Succeeded);
    assert_node_status(&nodes, "after", Status::Succeeded);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));

    // A second delivery finds nothing waiting.
    assert!(!harness.complete_task(&tasks[0], json!({})).await.unwrap());
}

#[tokio::test]
async fn test_parallel_stages_aggregate() {
    let failing = Arc::new(RecordingSyncStep::new(json!({})).always_failing());
    let step_type = StepExecutable::Sync(failing);
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let definition = pipeline(
        "p",
        vec![parallel(vec![
            stage("eu", vec![echo("roll_eu")]),
            stage("us", vec![step("roll_us", "Flaky", json!({}))]),
        ])],
    );

    let exec = harness.start(&definition).await.unwrap();

    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "roll_eu", Status::Succeeded);
    assert_node_status(&nodes, "roll_us", Status::Failed);
    assert_node_status(&nodes, "parallel", Status::Failed);
    let fork = node(&nodes, "parallel");
    let branches = nodes.iter().filter(|n| n.parent_id == Some(fork.uuid)).count();
    assert_eq!(branches, 2);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Failed));
}

#[tokio::test]
async fn test_retry_until_success() {
    let flaky = Arc::new(RecordingSyncStep::new(json!({"ok": true})).failing(2));
    let step_type = StepExecutable::Sync(flaky.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let retried = with_failure_strategy(
        step("flaky", "Flaky", json!({})),
        json!({"type": "Retry", "spec": {"retryCount": 3}}),
    );
    let definition = pipeline("p", vec![stage("s1", vec![retried, echo("after")])]);

    let exec = harness.start(&definition).await.unwrap();

    assert_eq!(flaky.call_count(), 3);
    let nodes = harness.nodes(exec).await;
    let attempts: Vec<&NodeExecution> = nodes.iter().filter(|n| n.identifier == "flaky").collect();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts.iter().filter(|n| n.old_retry).count(), 2);

    let last = node(&nodes, "flaky");
    assert_eq!(last.status, Status::Succeeded);
    assert_eq!(last.retry_index, 2);
    assert_eq!(last.retry_ids, vec![attempts[0].uuid, attempts[1].uuid]);
    assert_eq!(node(&nodes, "after").previous_id, Some(last.uuid));
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_retry_exhausted_marks_failure() {
    let flaky = Arc::new(RecordingSyncStep::new(json!({})).always_failing());
    let step_type = StepExecutable::Sync(flaky.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let retried = with_failure_strategy(
        step("flaky", "Flaky", json!({})),
        json!({"type": "Retry", "spec": {"retryCount": 1}}),
    );

    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![retried])]))
        .await
        .unwrap();

    assert_eq!(flaky.call_count(), 2);
    assert_node_status(&harness.nodes(exec).await, "flaky", Status::Failed);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Failed));
}

#[tokio::test]
async fn test_ignored_failure_continues() {
    let failing = Arc::new(RecordingSyncStep::new(json!({})).always_failing());
    let step_type = StepExecutable::Sync(failing);
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let ignored = with_failure_strategy(step("flaky", "Flaky", json!({})), json!({"type": "Ignore"}));
    let definition = pipeline("p", vec![stage("s1", vec![ignored, echo("after")])]);

    let exec = harness.start(&definition).await.unwrap();

    let nodes = harness.nodes(exec).await;
    let flaky = node(&nodes, "flaky");
    assert_eq!(flaky.status, Status::Failed);
    assert!(flaky.failure_ignored);
    assert_node_status(&nodes, "after", Status::Succeeded);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_when_condition_skips_node() {
    let harness = EngineHarness::new();
    let mut gated = echo("prod_only");
    gated["step"]["when"] = json!({
        "pipelineStatus": "Success",
        "condition": "<+inputs.env> == \"prod\""
    });
    let definition = pipeline("p", vec![stage("s1", vec![gated, echo("always")])]);

    let exec = harness
        .start_with_inputs(&definition, json!({"env": "dev"}))
        .await
        .unwrap();

    let nodes = harness.nodes(exec).await;
    let skipped = node(&nodes, "prod_only");
    assert_eq!(skipped.status, Status::Skipped);
    assert_eq!(skipped.skip_type, SkipType::SkipNode);
    assert_node_status(&nodes, "always", Status::Succeeded);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_strategy_runs_each_iteration() {
    let harness = EngineHarness::new();
    let mut repeated = echo("rep");
    repeated["step"]["strategy"] = json!({"repeat": {"times": 3}});

    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![repeated])]))
        .await
        .unwrap();

    let nodes = harness.nodes(exec).await;
    let iterations: Vec<&NodeExecution> = nodes
        .iter()
        .filter(|n| n.identifier.starts_with("rep_"))
        .collect();
    assert_eq!(iterations.len(), 3);
    assert!(iterations.iter().all(|n| n.status == Status::Succeeded));
    assert!(iterations.iter().all(|n| n.strategy_metadata().is_some()));
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_child_pipeline_runs_to_completion() {
    let harness = EngineHarness::new();
    let child = pipeline("child", vec![stage("cs", vec![echo("c1")])]);
    let definition = pipeline(
        "parent",
        vec![child_pipeline_stage("chained", child), stage("s2", vec![echo("after")])],
    );

    let exec = harness.start(&definition).await.unwrap();

    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
    let nodes = harness.nodes(exec).await;
    let chained = node(&nodes, "chained");
    assert_eq!(chained.status, Status::Succeeded);
    assert_node_status(&nodes, "after", Status::Succeeded);

    let child_exec = child_execution_of(&harness, chained).await;
    assert_eq!(harness.execution_status(child_exec).await, Some(Status::Succeeded));
    assert_node_status(&harness.nodes(child_exec).await, "c1", Status::Succeeded);
    let execution = harness.engine.get_execution(child_exec).await.unwrap();
    assert!(execution.metadata.is_nested());
}

#[tokio::test]
async fn test_abort_propagates_into_child_pipeline() {
    let (harness, manual) = manual_harness();
    let child = pipeline(
        "child",
        vec![stage("cs", vec![step("wait", "Manual", json!({}))])],
    );
    let definition = pipeline("parent", vec![child_pipeline_stage("chained", child)]);

    let exec = harness.start(&definition).await.unwrap();
    let nodes = harness.nodes(exec).await;
    let chained = node(&nodes, "chained");
    assert_eq!(chained.status, Status::AsyncWaiting);
    let child_exec = child_execution_of(&harness, chained).await;
    assert_node_status(&harness.nodes(child_exec).await, "wait", Status::AsyncWaiting);

    let outcome = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::AbortAll,
            exec,
            InterruptConfig::issued_by("alice").with_reason("bad deploy"),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, InterruptOutcome::Registered { .. }));

    assert_eq!(harness.execution_status(exec).await, Some(Status::Aborted));
    assert_eq!(harness.execution_status(child_exec).await, Some(Status::Aborted));
    let child_nodes = harness.nodes(child_exec).await;
    assert_node_status(&child_nodes, "wait", Status::Aborted);
    assert_eq!(manual.aborted(), vec![node(&child_nodes, "wait").uuid]);
    assert_all_terminal(&harness.nodes(exec).await);
    assert_all_terminal(&child_nodes);

    let derived = harness.store.list_interrupts(child_exec).await.unwrap();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].interrupt_type, InterruptType::AbortAll);
    assert_eq!(
        derived[0].config.source_interrupt_id,
        Some(outcome.interrupt_id())
    );
}

#[tokio::test]
async fn test_abort_single_node_ends_its_chain() {
    let (harness, manual) = manual_harness();
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![step("wait", "Manual", json!({})), echo("after")])],
    );
    let exec = harness.start(&definition).await.unwrap();
    let wait = node(&harness.nodes(exec).await, "wait").uuid;

    let request = InterruptRequest::new(InterruptType::Abort, exec, InterruptConfig::issued_by("bob"))
        .for_node(wait);
    let outcome = harness.engine.register_interrupt(request).await.unwrap();
    assert!(matches!(outcome, InterruptOutcome::Registered { .. }));

    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "wait", Status::Aborted);
    assert!(latest_attempt(&nodes, "after").is_none());
    assert_eq!(manual.aborted(), vec![wait]);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Aborted));

    // A late callback for the aborted node is dropped.
    let resumed = harness
        .engine
        .notify_callback(&ManualAsyncStep::callback_for(wait), json!({}))
        .await
        .unwrap();
    assert!(!resumed);
}

#[tokio::test]
async fn test_concurrent_aborts_apply_once() {
    let transport = InMemoryWorkerTransport::new().with_abort_delay(Duration::from_millis(50));
    let harness = EngineHarness::with_transport(transport, |b| b);
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![step("build", "ShellScript", json!({"script": "make"}))])],
    );
    let exec = harness.start(&definition).await.unwrap();
    assert_node_status(&harness.nodes(exec).await, "build", Status::AsyncWaiting);

    let abort = || {
        InterruptRequest::new(InterruptType::AbortAll, exec, InterruptConfig::issued_by("alice"))
    };
    let (first, second) = tokio::join!(
        harness.engine.register_interrupt(abort()),
        harness.engine.register_interrupt(abort()),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert!(matches!(first, InterruptOutcome::Registered { .. }));
    assert_eq!(
        second,
        InterruptOutcome::AlreadyPending {
            interrupt_id: first.interrupt_id()
        }
    );
    assert_eq!(harness.transport.aborted().len(), 1);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Aborted));
}

#[tokio::test]
async fn test_interrupt_on_concluded_execution_is_ignored() {
    let harness = EngineHarness::new();
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![echo("a")])]))
        .await
        .unwrap();

    let outcome = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::AbortAll,
            exec,
            InterruptConfig::issued_by("alice"),
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, InterruptOutcome::Ignored { .. }));
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
    let names: Vec<String> = harness.events.events().into_iter().map(|(n, _)| n).collect();
    assert!(names.iter().any(|n| n == event_names::INTERRUPT_IGNORED));
}

#[tokio::test]
async fn test_interrupt_validation() {
    let harness = EngineHarness::new();
    let missing = Uuid::new_v4();
    let err = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::Pause,
            missing,
            InterruptConfig::issued_by("alice"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Interrupt(_)));

    let (harness, _) = manual_harness();
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![step("wait", "Manual", json!({}))])]))
        .await
        .unwrap();
    let err = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::Expire,
            exec,
            InterruptConfig::issued_by("alice"),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Interrupt(_)));
}

#[tokio::test]
async fn test_pause_holds_new_nodes_until_resume() {
    let (harness, _) = manual_harness();
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![step("wait", "Manual", json!({})), echo("after")])],
    );
    let exec = harness.start(&definition).await.unwrap();
    let wait = node(&harness.nodes(exec).await, "wait").uuid;

    let pause = InterruptRequest::new(InterruptType::Pause, exec, InterruptConfig::issued_by("ops"));
    harness.engine.register_interrupt(pause.clone()).await.unwrap();
    assert_eq!(harness.execution_status(exec).await, Some(Status::Paused));
    let again = harness.engine.register_interrupt(pause).await.unwrap();
    assert!(matches!(again, InterruptOutcome::AlreadyPending { .. }));

    assert!(harness
        .engine
        .notify_callback(&ManualAsyncStep::callback_for(wait), json!({"v": 1}))
        .await
        .unwrap());
    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "wait", Status::Succeeded);
    assert_node_status(&nodes, "after", Status::Paused);

    let resume = InterruptRequest::new(InterruptType::Resume, exec, InterruptConfig::issued_by("ops"));
    let outcome = harness.engine.register_interrupt(resume).await.unwrap();
    assert!(matches!(outcome, InterruptOutcome::Registered { .. }));

    assert_node_status(&harness.nodes(exec).await, "after", Status::Succeeded);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_resume_without_pause_is_ignored() {
    let (harness, _) = manual_harness();
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![step("wait", "Manual", json!({}))])]))
        .await
        .unwrap();
    let outcome = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::Resume,
            exec,
            InterruptConfig::issued_by("ops"),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, InterruptOutcome::Ignored { .. }));
    assert_eq!(harness.execution_status(exec).await, Some(Status::Running));
}

#[tokio::test]
async fn test_overdue_callbacks_expire() {
    let (harness, manual) = manual_harness();
    let mut waiting = step("wait", "Manual", json!({}));
    waiting["step"]["timeout"] = json!("1s");
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![waiting])]))
        .await
        .unwrap();

    assert_eq!(harness.engine.expire_overdue(now_utc()).await.unwrap(), 0);
    let later = now_utc() + chrono::Duration::seconds(5);
    // A wait whose node record is gone is skipped, not fatal to the sweep.
    harness
        .store
        .register_callbacks(Uuid::new_v4(), vec!["orphan".into()], Some(now_utc()))
        .await
        .unwrap();
    assert_eq!(harness.engine.expire_overdue(later).await.unwrap(), 1);

    let nodes = harness.nodes(exec).await;
    let wait = node(&nodes, "wait");
    assert_eq!(wait.status, Status::Expired);
    assert_eq!(manual.aborted(), vec![wait.uuid]);
    let status = harness.execution_status(exec).await.unwrap();
    assert!(status.is_failure(), "unexpected status {status}");
}

#[tokio::test]
async fn test_graph_links_chains_and_heads() {
    let harness = EngineHarness::new();
    let exec = harness
        .start(&pipeline("p", vec![stage("s1", vec![echo("a"), echo("b")])]))
        .await
        .unwrap();

    let graph = harness.engine.generate_graph(exec).await.unwrap();
    assert_eq!(graph.status, Status::Succeeded);
    let root = graph.find("p").unwrap().uuid;
    assert_eq!(graph.root_node_ids, vec![root]);

    let a = graph.find("a").unwrap().uuid;
    let b = graph.find("b").unwrap().uuid;
    let section = graph.find("execution").unwrap().uuid;
    assert_eq!(graph.edges(section).unwrap().edges, vec![a]);
    assert_eq!(graph.edges(a).unwrap().next_ids, vec![b]);
    assert_eq!(graph.edges(b).unwrap().prev_ids, vec![a]);
    assert_eq!(graph.edges(b).unwrap().parent_id, Some(section));

    // Served from cache until something changes.
    let again = harness.engine.generate_graph(exec).await.unwrap();
    assert_eq!(again.cache_order, graph.cache_order);
}

#[tokio::test]
async fn test_partial_graph_matches_full_subtree() {
    let harness = EngineHarness::new();
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![echo("a"), echo("b")]), stage("s2", vec![echo("c")])],
    );
    let exec = harness.start(&definition).await.unwrap();

    let full = harness.engine.generate_graph(exec).await.unwrap();
    let s1 = full.find("s1").unwrap().uuid;
    let partial = harness.engine.generate_partial_graph(exec, s1).await.unwrap();

    let partial_ids: BTreeSet<Uuid> = partial.vertices.iter().map(|v| v.uuid).collect();
    assert_eq!(partial_ids, full.subtree(s1));
    assert!(partial.find("c").is_none());
    let a = partial.find("a").unwrap().uuid;
    assert_eq!(partial.edges(a), full.edges(a));
}

#[tokio::test]
async fn test_mode_mismatch_rejected_at_start() {
    let registry = StepRegistry::with_defaults()
        .with_step("Echo", StepExecutable::asynchronous(ManualAsyncStep::new()));
    let harness = EngineHarness::with_builder(|b| b.with_step_registry(Arc::new(registry)));

    let err = harness
        .start(&pipeline("p", vec![stage("s1", vec![echo("a")])]))
        .await
        .unwrap_err();

    match err {
        EngineError::PlanCreation(e @ PlanCreationError::InvalidMode { .. }) => {
            assert_eq!(e.code(), "PLAN-006-INVALID_MODE");
        }
        other => panic!("unexpected error {other}"),
    }
}

struct DenyAll;

#[async_trait::async_trait]
impl PolicyGate for DenyAll {
    async fn evaluate(
        &self,
        _definition: &Value,
        _metadata: &ExecutionMetadata,
    ) -> Result<PolicyDecision, EngineError> {
        Ok(PolicyDecision::deny("frozen"))
    }
}

#[tokio::test]
async fn test_policy_gate_blocks_start() {
    let harness = EngineHarness::with_builder(|b| b.with_policy_gate(Arc::new(DenyAll)));
    let err = harness
        .start(&pipeline("p", vec![stage("s1", vec![echo("a")])]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PolicyDenied { .. }));
    assert!(harness.events.is_empty());
}

#[tokio::test]
async fn test_strategy_respects_max_concurrency() {
    let (harness, blocking) = blocking_harness();
    let mut repeated = step("rep", "Block", json!({}));
    repeated["step"]["strategy"] = json!({"repeat": {"times": 3, "maxConcurrency": 2}});
    let definition = pipeline("p", vec![stage("s1", vec![repeated])]);

    let engine = harness.engine.clone();
    let run = tokio::spawn(async move {
        engine
            .start_execution(&definition, json!({}), ExecutionMetadata::manual("tester"))
            .await
    });

    assert!(blocking.wait_for_active(2, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(blocking.entered(), 2);

    blocking.release(3);
    let exec = run.await.unwrap().unwrap();
    assert_eq!(blocking.entered(), 3);
    assert_eq!(blocking.max_active(), 2);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}

#[tokio::test]
async fn test_abort_cancels_running_sync_step() {
    let (harness, blocking) = blocking_harness();
    let definition = pipeline(
        "p",
        vec![stage("s1", vec![step("hold", "Block", json!({})), echo("never")])],
    );

    let engine = harness.engine.clone();
    let run = tokio::spawn(async move {
        engine
            .start_execution(&definition, json!({}), ExecutionMetadata::manual("tester"))
            .await
    });
    assert!(blocking.wait_for_active(1, Duration::from_secs(2)).await);
    let exec = started_execution(&harness);

    let outcome = harness
        .engine
        .register_interrupt(InterruptRequest::new(
            InterruptType::AbortAll,
            exec,
            InterruptConfig::issued_by("tester"),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, InterruptOutcome::Registered { .. }));

    run.await.unwrap().unwrap();
    assert_eq!(blocking.active(), 0);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Aborted));
    let nodes = harness.nodes(exec).await;
    assert_node_status(&nodes, "hold", Status::Aborted);
    assert!(latest_attempt(&nodes, "never").is_none());
}

#[tokio::test]
async fn test_unknown_child_completion_is_dropped() {
    let harness = EngineHarness::new();
    let delivered = harness
        .engine
        .on_child_execution_completion(Uuid::new_v4(), Status::Succeeded)
        .await
        .unwrap();
    assert!(!delivered);
}

#[tokio::test]
async fn test_retry_wait_does_not_outlive_aborted_stage() {
    let flaky = Arc::new(RecordingSyncStep::new(json!({})).always_failing());
    let blocking = Arc::new(BlockingSyncStep::new());
    let flaky_type = StepExecutable::Sync(flaky.clone());
    let blocking_type = StepExecutable::Sync(blocking.clone());
    let harness = EngineHarness::with_builder(|b| {
        b.with_step_type("Flaky", flaky_type)
            .with_step_type("Block", blocking_type)
    });
    let retried = with_failure_strategy(
        step("flaky", "Flaky", json!({})),
        json!({"type": "Retry", "spec": {"retryCount": 1, "retryIntervals": ["300ms"]}}),
    );
    let definition = pipeline(
        "p",
        vec![parallel(vec![
            stage("s1", vec![retried]),
            stage("s2", vec![step("hold", "Block", json!({}))]),
        ])],
    );

    let engine = harness.engine.clone();
    let run = tokio::spawn(async move {
        engine
            .start_execution(&definition, json!({}), ExecutionMetadata::manual("tester"))
            .await
    });
    assert!(blocking.wait_for_active(1, Duration::from_secs(2)).await);
    assert_eq!(flaky.call_count(), 1);

    // Abort the stage while its step waits out the retry interval.
    let exec = started_execution(&harness);
    let s1 = node(&harness.nodes(exec).await, "s1").uuid;
    let outcome = harness
        .engine
        .register_interrupt(
            InterruptRequest::new(InterruptType::Abort, exec, InterruptConfig::issued_by("tester"))
                .for_node(s1),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, InterruptOutcome::Registered { .. }));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(flaky.call_count(), 1);

    blocking.release(1);
    run.await.unwrap().unwrap();

    let nodes = harness.nodes(exec).await;
    assert_eq!(nodes.iter().filter(|n| n.identifier == "flaky").count(), 1);
    assert_node_status(&nodes, "s1", Status::Aborted);
    assert_node_status(&nodes, "hold", Status::Succeeded);
    assert_all_terminal(&nodes);
}

#[tokio::test]
async fn test_child_ambiance_extends_parent() {
    let flaky = Arc::new(RecordingSyncStep::new(json!({})).failing(1));
    let step_type = StepExecutable::Sync(flaky.clone());
    let harness = EngineHarness::with_builder(|b| b.with_step_type("Flaky", step_type));
    let retried = with_failure_strategy(
        step("flaky", "Flaky", json!({})),
        json!({"type": "Retry", "spec": {"retryCount": 2}}),
    );
    let mut repeated = echo("rep");
    repeated["step"]["strategy"] = json!({"repeat": {"times": 2}});
    let definition = pipeline(
        "p",
        vec![parallel(vec![
            stage("eu", vec![retried, repeated]),
            stage("us", vec![echo("roll_us")]),
        ])],
    );

    let exec = harness.start(&definition).await.unwrap();
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));

    let nodes = harness.nodes(exec).await;
    assert!(nodes.iter().any(|n| n.old_retry));
    assert!(nodes.iter().any(|n| n.strategy_metadata().is_some()));
    let by_id: std::collections::HashMap<Uuid, &NodeExecution> =
        nodes.iter().map(|n| (n.uuid, n)).collect();
    let mut checked = 0;
    for record in &nodes {
        let Some(parent_id) = record.parent_id else {
            continue;
        };
        let parent = by_id[&parent_id];
        assert!(
            record.ambiance.is_strict_extension_of(&parent.ambiance),
            "{} does not extend {}",
            record.identifier,
            parent.identifier
        );
        checked += 1;
    }
    assert_eq!(checked, nodes.iter().filter(|n| n.parent_id.is_some()).count());
    assert!(checked > 5);
}

#[tokio::test]
async fn test_fork_waits_for_every_async_branch() {
    let (harness, manual) = manual_harness();
    let definition = pipeline(
        "p",
        vec![parallel(vec![
            stage("eu", vec![step("wait_eu", "Manual", json!({}))]),
            stage("us", vec![step("wait_us", "Manual", json!({}))]),
        ])],
    );

    let exec = harness.start(&definition).await.unwrap();
    let started = manual.started();
    assert_eq!(started.len(), 2);
    let fork = node(&harness.nodes(exec).await, "parallel").uuid;

    assert!(harness
        .engine
        .notify_callback(&ManualAsyncStep::callback_for(started[0]), json!({}))
        .await
        .unwrap());
    let nodes = harness.nodes(exec).await;
    assert!(!node(&nodes, "parallel").is_terminal());
    assert_eq!(harness.execution_status(exec).await, Some(Status::Running));

    assert!(harness
        .engine
        .notify_callback(&ManualAsyncStep::callback_for(started[1]), json!({}))
        .await
        .unwrap());
    assert_node_status(&harness.nodes(exec).await, "parallel", Status::Succeeded);
    let fork_conclusions = harness
        .events
        .payloads(event_names::NODE_CONCLUDED)
        .iter()
        .filter(|data| data["node_execution_id"] == json!(fork))
        .count();
    assert_eq!(fork_conclusions, 1);
    assert_eq!(harness.execution_status(exec).await, Some(Status::Succeeded));
}
