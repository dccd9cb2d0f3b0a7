//! The orchestration engine.
//!
//! The engine owns plan executions from start to conclusion:
//!
//! - **Facilitation**: a node runs through the facilitator of its mode. Sync
//!   nodes conclude inline, async nodes park on callback ids, child and
//!   multi-child nodes start their children and conclude when the children do.
//! - **Advisement**: a concluded node is advised exactly once. The first
//!   applicable adviser routes onwards (next step, retry, ignore, rollback,
//!   abort); a chain whose last node has no successor reports to its parent.
//! - **Interrupts**: abort, pause, resume and expire signals are recorded and
//!   applied, and aborts propagate into nested executions.
//!
//! All work runs on the caller's task. A multi-child node polls its started
//! children concurrently; only the expiry monitor is spawned.

mod advisement;
mod builder;
mod expiry;
mod facilitation;
mod interrupts;
mod policy;

#[cfg(test)]
mod integration_tests;

pub use builder::EngineBuilder;
pub use policy::{AllowAll, PolicyDecision, PolicyGate};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ambiance::{Ambiance, ExecutionMetadata};
use crate::cancellation::ExecutionTokens;
use crate::config::EngineConfig;
use crate::core::{OrchestrationEvent, Status};
use crate::creation::PlanCreatorService;
use crate::dispatch::{TaskDispatcher, TaskResponse};
use crate::errors::{EngineError, PlanCreationError, StoreError};
use crate::events::{emit_event, EventSink};
use crate::execution::{ExecutionStore, NodeExecution, PlanExecution};
use crate::graph::{GraphProjector, OrchestrationGraph};
use crate::interrupts::{InterruptOutcome, InterruptRequest, InterruptState};
use crate::observability::ExecutionSpanAttributes;
use crate::plan::{Plan, PlanNode};
use crate::steps::{OrchestrationHandle, StepContext, StepRegistry};
use crate::utils::generate_uuid;

use facilitation::NodeLaunch;

type EngineFuture<'a, T = ()> = BoxFuture<'a, Result<T, EngineError>>;

const UNREGISTERED: &str = "UNREGISTERED";

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    dispatcher: Arc<TaskDispatcher>,
    sink: Arc<dyn EventSink>,
    steps: Arc<StepRegistry>,
    creator: PlanCreatorService,
    policy: Arc<dyn PolicyGate>,
    graph: Arc<GraphProjector>,
    tokens: ExecutionTokens,
    /// Child executions created by an async node, launched once the node
    /// waits on them.
    pending_launches: DashMap<Uuid, Vec<Uuid>>,
}

/// Drives plan executions. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl OrchestrationEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The execution store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        self.inner.store.clone()
    }

    /// The task dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<TaskDispatcher> {
        self.inner.dispatcher.clone()
    }

    /// The step registry.
    #[must_use]
    pub fn steps(&self) -> &StepRegistry {
        &self.inner.steps
    }

    /// Builds a plan for `definition`, records a new execution and runs it
    /// until it concludes or every open node waits on a callback.
    pub async fn start_execution(
        &self,
        definition: &Value,
        inputs: Value,
        metadata: ExecutionMetadata,
    ) -> Result<Uuid, EngineError> {
        self.start_execution_with_setup(definition, inputs, metadata, BTreeMap::new())
            .await
    }

    /// Like [`start_execution`](Self::start_execution), with setup
    /// abstractions such as the account id.
    pub async fn start_execution_with_setup(
        &self,
        definition: &Value,
        inputs: Value,
        metadata: ExecutionMetadata,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Result<Uuid, EngineError> {
        let decision = self.inner.policy.evaluate(definition, &metadata).await?;
        if !decision.allowed {
            return Err(EngineError::PolicyDenied {
                reason: decision
                    .reason
                    .unwrap_or_else(|| "denied by policy".to_string()),
            });
        }

        let plan = self.inner.creator.create_plan(definition)?;
        let plan_execution_id = generate_uuid();
        self.prepare_execution(plan_execution_id, plan, inputs, metadata, setup_abstractions)
            .await?;
        self.run_execution(plan_execution_id).await?;
        Ok(plan_execution_id)
    }

    /// Loads an execution record.
    pub async fn get_execution(&self, plan_execution_id: Uuid) -> Result<PlanExecution, EngineError> {
        match self.inner.store.get_plan_execution(plan_execution_id).await {
            Ok(execution) => Ok(execution),
            Err(StoreError::NotFound { .. }) => {
                Err(EngineError::ExecutionNotFound(plan_execution_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Node executions of an execution in creation order.
    pub async fn node_executions(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Vec<NodeExecution>, EngineError> {
        Ok(self
            .inner
            .store
            .fetch_node_executions(plan_execution_id)
            .await?)
    }

    /// The display graph of an execution.
    pub async fn generate_graph(
        &self,
        plan_execution_id: Uuid,
    ) -> Result<Arc<OrchestrationGraph>, EngineError> {
        self.inner.graph.generate_graph(plan_execution_id).await
    }

    /// The display graph of the subtree rooted at a node execution.
    pub async fn generate_partial_graph(
        &self,
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
    ) -> Result<OrchestrationGraph, EngineError> {
        self.inner
            .graph
            .generate_partial_graph(plan_execution_id, node_execution_id)
            .await
    }

    /// Delivers a remote task response.
    ///
    /// Returns false when no node waits on the task any more.
    pub async fn on_task_completion(&self, response: TaskResponse) -> Result<bool, EngineError> {
        self.inner.dispatcher.complete(&response.task_id);
        let payload = serde_json::to_value(&response)?;
        self.notify_callback(&response.task_id, payload).await
    }

    /// Delivers a response for a callback id.
    ///
    /// The waiting node resumes once its last outstanding callback arrives.
    /// Returns false if the callback is unknown, was already resolved, or
    /// the node concluded in the meantime.
    pub fn notify_callback<'a>(&'a self, callback_id: &'a str, response: Value) -> EngineFuture<'a, bool> {
        async move {
            let Some(resolution) = self
                .inner
                .store
                .resolve_callback(callback_id, response)
                .await?
            else {
                debug!(callback_id, "No node waits on callback");
                return Ok(false);
            };

            let record = self
                .inner
                .store
                .get_node_execution(resolution.node_execution_id)
                .await?;
            if record.is_terminal() {
                debug!(
                    node_execution_id = %record.uuid,
                    status = %record.status,
                    "Callback arrived after the node concluded"
                );
                return Ok(false);
            }
            self.resume_async(record, resolution.responses).await?;
            Ok(true)
        }
        .boxed()
    }

    /// Reports the conclusion of a nested execution to the node that
    /// launched it. The child's execution id is the callback id.
    pub fn on_child_execution_completion(
        &self,
        child_execution_id: Uuid,
        status: Status,
    ) -> EngineFuture<'_, bool> {
        async move {
            let callback_id = child_execution_id.to_string();
            let payload = json!({ "status": status, "planExecutionId": child_execution_id });
            self.notify_callback(&callback_id, payload).await
        }
        .boxed()
    }

    async fn prepare_execution(
        &self,
        plan_execution_id: Uuid,
        plan: Arc<Plan>,
        inputs: Value,
        metadata: ExecutionMetadata,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        self.check_modes(&plan)?;
        self.inner.store.put_plan(plan.clone()).await?;

        let attributes = ExecutionSpanAttributes::new(plan_execution_id)
            .with_plan_id(plan.plan_id.clone())
            .with_triggered_by(metadata.triggered_by.clone());
        let nested = metadata.is_nested();
        let execution = PlanExecution::new(plan_execution_id, plan.plan_id.clone(), inputs, metadata)
            .with_setup_abstractions(setup_abstractions);
        self.inner.store.create_plan_execution(execution).await?;
        self.emit(&OrchestrationEvent::plan_started(plan_execution_id, &plan.plan_id));
        info!(
            %plan_execution_id,
            plan_id = %plan.plan_id,
            nodes = plan.len(),
            nested,
            attributes = ?attributes.to_otel_attributes(),
            "Plan execution created"
        );
        Ok(())
    }

    /// Rejects a plan whose nodes declare a mode their registered step does
    /// not implement.
    fn check_modes(&self, plan: &Plan) -> Result<(), PlanCreationError> {
        for node in plan.nodes.values() {
            let registered = self.inner.steps.get(&node.step_type.type_name);
            if registered.as_ref().map(|s| s.mode()) == Some(node.facilitator) {
                continue;
            }
            return Err(PlanCreationError::InvalidMode {
                node_id: node.uuid.clone(),
                step_type: node.step_type.type_name.clone(),
                expected: node.facilitator,
                actual: registered.map_or_else(|| UNREGISTERED.to_string(), |s| s.mode().to_string()),
            });
        }
        Ok(())
    }

    fn run_execution(&self, plan_execution_id: Uuid) -> EngineFuture<'_> {
        async move {
            let execution = self.inner.store.get_plan_execution(plan_execution_id).await?;
            if execution.status.is_terminal() {
                return Ok(());
            }
            let plan = self.inner.store.get_plan(&execution.plan_id).await?;
            let ambiance = Ambiance::new(
                plan_execution_id,
                execution.plan_id,
                execution.setup_abstractions,
                execution.metadata,
            );
            self.start_node(NodeLaunch::root(plan.start_node_id.clone(), ambiance))
                .await
        }
        .boxed()
    }

    /// Concludes an execution and notifies the parent execution, if any.
    fn conclude_execution(&self, plan_execution_id: Uuid, status: Status) -> EngineFuture<'_> {
        async move {
            let execution = match self
                .inner
                .store
                .update_plan_status(plan_execution_id, status)
                .await
            {
                Ok(execution) => execution,
                Err(StoreError::InvalidTransition { from, .. }) => {
                    debug!(%plan_execution_id, %from, %status, "Execution already concluded");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let attributes = ExecutionSpanAttributes::new(plan_execution_id)
                .with_plan_id(execution.plan_id.clone())
                .with_triggered_by(execution.metadata.triggered_by.clone())
                .with_status(status);
            info!(
                %plan_execution_id,
                %status,
                attributes = ?attributes.to_otel_attributes(),
                "Plan execution concluded"
            );
            self.emit(&OrchestrationEvent::plan_concluded(plan_execution_id, status));

            for interrupt in self.inner.store.active_interrupts(plan_execution_id).await? {
                self.inner
                    .store
                    .update_interrupt_state(plan_execution_id, interrupt.uuid, InterruptState::Processed)
                    .await?;
            }
            self.inner.tokens.release(plan_execution_id);

            if execution.metadata.is_nested() {
                self.on_child_execution_completion(plan_execution_id, status)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn step_context(&self, record: &NodeExecution, node: &PlanNode, inputs: Value) -> StepContext {
        StepContext::new(
            record.ambiance.clone(),
            record.uuid,
            node.clone(),
            Arc::new(self.clone()),
        )
        .with_inputs(inputs)
        .with_retry_index(record.retry_index)
        .with_cancellation(self.inner.tokens.token(record.plan_execution_id))
    }

    fn emit(&self, event: &OrchestrationEvent) {
        emit_event(self.inner.sink.as_ref(), event);
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.inner.config)
            .field("steps", &self.inner.steps.len())
            .field("pending_launches", &self.inner.pending_launches.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OrchestrationHandle for OrchestrationEngine {
    fn store(&self) -> Arc<dyn ExecutionStore> {
        self.inner.store.clone()
    }

    fn dispatcher(&self) -> Arc<TaskDispatcher> {
        self.inner.dispatcher.clone()
    }

    /// Records a nested execution for a pipeline stage. It starts once the
    /// stage waits on it.
    async fn create_child_execution(
        &self,
        ctx: &StepContext,
        definition: &Value,
        inputs: Value,
    ) -> Result<Uuid, EngineError> {
        let plan = self.inner.creator.create_child_plan(definition)?;
        let parent = self.get_execution(ctx.plan_execution_id()).await?;
        let child_id = generate_uuid();
        let metadata =
            ExecutionMetadata::child_of(&parent.metadata, parent.uuid, ctx.node_execution_id());
        self.prepare_execution(child_id, plan, inputs, metadata, parent.setup_abstractions)
            .await?;
        self.inner
            .pending_launches
            .entry(ctx.node_execution_id())
            .or_default()
            .push(child_id);
        info!(
            parent_execution_id = %parent.uuid,
            node_execution_id = %ctx.node_execution_id(),
            child_execution_id = %child_id,
            "Child execution created"
        );
        Ok(child_id)
    }

    async fn register_interrupt(
        &self,
        request: InterruptRequest,
    ) -> Result<InterruptOutcome, EngineError> {
        self.interrupt(request).await
    }
}
