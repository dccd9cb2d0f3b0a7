//! Test fixtures: a static orchestration handle, definition builders and an
//! engine harness.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ambiance::{Ambiance, ExecutionMetadata, Level};
use crate::config::EngineConfig;
use crate::core::Status;
use crate::dispatch::{InMemoryWorkerTransport, TaskDispatcher, TaskResponse};
use crate::engine::{EngineBuilder, OrchestrationEngine};
use crate::errors::EngineError;
use crate::events::CollectingEventSink;
use crate::execution::{ExecutionStore, InMemoryExecutionStore, NodeExecution};
use crate::interrupts::{InterruptOutcome, InterruptRequest};
use crate::plan::PlanNode;
use crate::steps::{OrchestrationHandle, StepContext};
use crate::utils::generate_uuid;

/// An orchestration handle that records child launches and interrupts
/// instead of acting on them.
pub struct StaticHandle {
    store: Arc<InMemoryExecutionStore>,
    transport: Arc<InMemoryWorkerTransport>,
    dispatcher: Arc<TaskDispatcher>,
    children: Mutex<Vec<(Uuid, Value, Value)>>,
    interrupts: Mutex<Vec<InterruptRequest>>,
}

impl StaticHandle {
    /// A handle over an empty store and transport.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_transport(Arc::new(InMemoryWorkerTransport::new()))
    }

    /// A handle dispatching to `transport`.
    #[must_use]
    pub fn with_transport(transport: Arc<InMemoryWorkerTransport>) -> Arc<Self> {
        let dispatcher = TaskDispatcher::new(transport.clone())
            .with_poll_interval(Duration::from_millis(5))
            .with_abort_ack_timeout(Duration::from_millis(200));
        Arc::new(Self {
            store: Arc::new(InMemoryExecutionStore::new()),
            transport,
            dispatcher: Arc::new(dispatcher),
            children: Mutex::new(Vec::new()),
            interrupts: Mutex::new(Vec::new()),
        })
    }

    /// The concrete store.
    #[must_use]
    pub fn memory_store(&self) -> Arc<InMemoryExecutionStore> {
        self.store.clone()
    }

    /// The transport behind the dispatcher.
    #[must_use]
    pub fn transport(&self) -> Arc<InMemoryWorkerTransport> {
        self.transport.clone()
    }

    /// Child executions requested so far: id, definition and inputs.
    #[must_use]
    pub fn child_executions(&self) -> Vec<(Uuid, Value, Value)> {
        self.children.lock().clone()
    }

    /// Interrupt requests received so far.
    #[must_use]
    pub fn interrupts(&self) -> Vec<InterruptRequest> {
        self.interrupts.lock().clone()
    }
}

#[async_trait]
impl OrchestrationHandle for StaticHandle {
    fn store(&self) -> Arc<dyn ExecutionStore> {
        self.store.clone()
    }

    fn dispatcher(&self) -> Arc<TaskDispatcher> {
        self.dispatcher.clone()
    }

    async fn create_child_execution(
        &self,
        _ctx: &StepContext,
        definition: &Value,
        inputs: Value,
    ) -> Result<Uuid, EngineError> {
        let id = generate_uuid();
        self.children.lock().push((id, definition.clone(), inputs));
        Ok(id)
    }

    async fn register_interrupt(
        &self,
        request: InterruptRequest,
    ) -> Result<InterruptOutcome, EngineError> {
        self.interrupts.lock().push(request);
        Ok(InterruptOutcome::Registered {
            interrupt_id: generate_uuid(),
        })
    }
}

/// A step context for `node` in a fresh execution, backed by `handle`.
#[must_use]
pub fn step_context(handle: Arc<StaticHandle>, node: PlanNode) -> StepContext {
    let node_execution_id = generate_uuid();
    let level = Level::new(
        node_execution_id,
        node.uuid.clone(),
        node.identifier.clone(),
        node.step_type.clone(),
    );
    let ambiance = Ambiance::new(
        generate_uuid(),
        "test-plan",
        BTreeMap::new(),
        ExecutionMetadata::manual("tester"),
    )
    .clone_for_child(level);
    StepContext::new(ambiance, node_execution_id, node, handle)
}

/// A pipeline definition.
#[must_use]
pub fn pipeline(identifier: &str, stages: Vec<Value>) -> Value {
    json!({"pipeline": {"identifier": identifier, "stages": stages}})
}

/// A Custom stage running `steps` in order.
#[must_use]
pub fn stage(identifier: &str, steps: Vec<Value>) -> Value {
    json!({"stage": {
        "identifier": identifier,
        "type": "Custom",
        "spec": {"execution": {"steps": steps}}
    }})
}

/// A step element.
#[must_use]
pub fn step(identifier: &str, step_type: &str, spec: Value) -> Value {
    json!({"step": {"identifier": identifier, "type": step_type, "spec": spec}})
}

/// A parallel block.
#[must_use]
pub fn parallel(elements: Vec<Value>) -> Value {
    json!({ "parallel": elements })
}

/// Attaches a single on-failure action to a stage or step element.
#[must_use]
pub fn with_failure_strategy(mut element: Value, action: Value) -> Value {
    if let Some(inner) = element
        .as_object_mut()
        .and_then(|map| map.values_mut().next())
        .and_then(Value::as_object_mut)
    {
        inner.insert(
            "failureStrategies".to_string(),
            json!([{"onFailure": {"action": action}}]),
        );
    }
    element
}

/// An engine over in-memory parts with a collecting event sink.
pub struct EngineHarness {
    /// The engine.
    pub engine: OrchestrationEngine,
    /// Its store.
    pub store: Arc<InMemoryExecutionStore>,
    /// Its transport.
    pub transport: Arc<InMemoryWorkerTransport>,
    /// Every event the engine emitted.
    pub events: Arc<CollectingEventSink>,
}

impl EngineHarness {
    /// A harness with the built-in steps.
    #[must_use]
    pub fn new() -> Self {
        Self::with_builder(|builder| builder)
    }

    /// A harness whose builder is customised by `configure`.
    #[must_use]
    pub fn with_builder(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        Self::with_transport(InMemoryWorkerTransport::new(), configure)
    }

    /// A harness over a prepared transport.
    #[must_use]
    pub fn with_transport(
        transport: InMemoryWorkerTransport,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Self {
        let store = Arc::new(InMemoryExecutionStore::new());
        let transport = Arc::new(transport);
        let events = Arc::new(CollectingEventSink::new());
        let config = EngineConfig::new()
            .with_poll_interval_ms(5)
            .with_abort_ack_timeout_ms(200);
        let builder = EngineBuilder::new()
            .with_config(config)
            .with_store(store.clone())
            .with_transport(transport.clone())
            .with_event_sink(events.clone());
        Self {
            engine: configure(builder).build(),
            store,
            transport,
            events,
        }
    }

    /// Starts `definition` with empty inputs.
    pub async fn start(&self, definition: &Value) -> Result<Uuid, EngineError> {
        self.start_with_inputs(definition, json!({})).await
    }

    /// Starts `definition` with `inputs`.
    pub async fn start_with_inputs(
        &self,
        definition: &Value,
        inputs: Value,
    ) -> Result<Uuid, EngineError> {
        self.engine
            .start_execution(definition, inputs, ExecutionMetadata::manual("tester"))
            .await
    }

    /// Node executions of an execution in creation order.
    pub async fn nodes(&self, plan_execution_id: Uuid) -> Vec<NodeExecution> {
        self.store
            .fetch_node_executions(plan_execution_id)
            .await
            .unwrap_or_default()
    }

    /// Status of an execution, if it exists.
    pub async fn execution_status(&self, plan_execution_id: Uuid) -> Option<Status> {
        self.store
            .get_plan_execution(plan_execution_id)
            .await
            .ok()
            .map(|e| e.status)
    }

    /// Delivers a successful response for a remote task.
    pub async fn complete_task(&self, task_id: &str, payload: Value) -> Result<bool, EngineError> {
        self.engine
            .on_task_completion(TaskResponse::success(task_id, payload))
            .await
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
