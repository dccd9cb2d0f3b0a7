//! Node facilitation: starting node executions and concluding them.

use futures::future::{join_all, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{EngineFuture, OrchestrationEngine};
use crate::ambiance::{Ambiance, Level, StrategyMetadata};
use crate::conditions::EvaluationContext;
use crate::core::{OrchestrationEvent, SkipType, Status};
use crate::errors::{EngineError, StepError};
use crate::execution::{NodeExecution, NodePatch, PendingChild};
use crate::observability::{NodeSpanAttributes, SpanTimer};
use crate::plan::{Plan, PlanNode};
use crate::steps::{AsyncStep, ChildrenSpec, StepContext, StepExecutable};
use crate::utils::{deadline_after, earliest, generate_uuid, now_utc};

/// Where a new node execution goes and what it inherits.
#[derive(Debug, Clone)]
pub(super) struct NodeLaunch {
    plan_node_id: String,
    parent_id: Option<Uuid>,
    previous_id: Option<Uuid>,
    ambiance: Ambiance,
    strategy: Option<StrategyMetadata>,
    retry_index: u32,
    retry_ids: Vec<Uuid>,
}

impl NodeLaunch {
    /// The start node of an execution.
    pub(super) fn root(plan_node_id: impl Into<String>, ambiance: Ambiance) -> Self {
        Self {
            plan_node_id: plan_node_id.into(),
            parent_id: None,
            previous_id: None,
            ambiance,
            strategy: None,
            retry_index: 0,
            retry_ids: Vec::new(),
        }
    }

    /// The head of a chain nested under `parent`.
    pub(super) fn child(child: PendingChild, parent: &NodeExecution) -> Self {
        Self {
            plan_node_id: child.plan_node_id,
            parent_id: Some(parent.uuid),
            previous_id: None,
            ambiance: parent.ambiance.clone(),
            strategy: child.strategy,
            retry_index: 0,
            retry_ids: Vec::new(),
        }
    }

    /// The chain member after `previous`.
    pub(super) fn successor(plan_node_id: impl Into<String>, previous: &NodeExecution) -> Self {
        Self {
            plan_node_id: plan_node_id.into(),
            parent_id: previous.parent_id,
            previous_id: Some(previous.uuid),
            ambiance: previous.ambiance.clone_for_finish(),
            strategy: None,
            retry_index: 0,
            retry_ids: Vec::new(),
        }
    }

    /// Another attempt of `previous` at the same chain position.
    pub(super) fn retry(previous: &NodeExecution) -> Self {
        let mut retry_ids = previous.retry_ids.clone();
        retry_ids.push(previous.uuid);
        Self {
            plan_node_id: previous.plan_node_id.clone(),
            parent_id: previous.parent_id,
            previous_id: previous.previous_id,
            ambiance: previous.ambiance.clone_for_finish(),
            strategy: previous.strategy_metadata().cloned(),
            retry_index: previous.retry_index + 1,
            retry_ids,
        }
    }
}

pub(super) fn plan_node<'p>(plan: &'p Plan, plan_node_id: &str) -> Result<&'p PlanNode, EngineError> {
    plan.fetch_node(plan_node_id).ok_or_else(|| {
        EngineError::CorruptState(format!(
            "plan {} has no node {plan_node_id}",
            plan.plan_id
        ))
    })
}

impl OrchestrationEngine {
    /// Appends a node execution and runs it. Launches into a concluded
    /// execution or under a concluded parent are dropped; a paused execution
    /// holds the node.
    pub(super) fn start_node(&self, launch: NodeLaunch) -> EngineFuture<'_> {
        async move {
            let plan_execution_id = launch.ambiance.plan_execution_id;
            let execution = self.inner.store.get_plan_execution(plan_execution_id).await?;
            if execution.status.is_terminal() {
                debug!(
                    %plan_execution_id,
                    plan_node_id = %launch.plan_node_id,
                    "Execution concluded, node not started"
                );
                return Ok(());
            }
            if let Some(parent_id) = launch.parent_id {
                let parent = self.inner.store.get_node_execution(parent_id).await?;
                if parent.is_terminal() {
                    debug!(
                        %plan_execution_id,
                        plan_node_id = %launch.plan_node_id,
                        parent = %parent.identifier,
                        status = %parent.status,
                        "Parent concluded, node not started"
                    );
                    return Ok(());
                }
            }

            let plan = self.inner.store.get_plan(&launch.ambiance.plan_id).await?;
            let node = plan_node(&plan, &launch.plan_node_id)?;
            let uuid = generate_uuid();
            let identifier = match &launch.strategy {
                Some(strategy) => format!("{}_{}", node.identifier, strategy.current_iteration),
                None => node.identifier.clone(),
            };
            let mut level = Level::new(uuid, node.uuid.clone(), identifier, node.step_type.clone())
                .with_skip_expression_chain(node.skip_expression_chain)
                .with_retry_index(launch.retry_index);
            if let Some(group) = &node.group {
                level = level.with_group(group.clone());
            }
            if let Some(strategy) = launch.strategy {
                level = level.with_strategy_metadata(strategy);
            }

            let mut record = NodeExecution::queued(uuid, node, launch.ambiance.clone_for_child(level))
                .with_parent(launch.parent_id)
                .with_previous(launch.previous_id);
            record.retry_index = launch.retry_index;
            record.retry_ids = launch.retry_ids;
            let record = self.inner.store.append_node_execution(record).await?;
            self.emit(&OrchestrationEvent::node_created(
                plan_execution_id,
                uuid,
                &record.identifier,
            ));
            debug!(
                %plan_execution_id,
                node_execution_id = %uuid,
                identifier = %record.identifier,
                mode = %record.mode,
                retry_index = record.retry_index,
                "Node execution created"
            );

            if execution.status == Status::Paused {
                self.inner
                    .store
                    .transition_node_status(uuid, Status::Paused)
                    .await?;
                self.emit(&OrchestrationEvent::node_status_updated(
                    plan_execution_id,
                    uuid,
                    Status::Queued,
                    Status::Paused,
                ));
                self.inner.store.hold_paused(plan_execution_id, uuid).await?;
                info!(identifier = %record.identifier, "Execution paused, node held");
                return Ok(());
            }
            self.run_node(record).await
        }
        .boxed()
    }

    /// Runs a queued node through the facilitator of its mode.
    pub(super) fn run_node(&self, record: NodeExecution) -> EngineFuture<'_> {
        async move {
            let plan = self.inner.store.get_plan(&record.ambiance.plan_id).await?;
            let node = match plan_node(&plan, &record.plan_node_id) {
                Ok(node) => node.clone(),
                Err(e) => return self.force_errored(record.uuid, e).await,
            };
            let execution = self
                .inner
                .store
                .get_plan_execution(record.plan_execution_id)
                .await?;

            if let Some(when) = &node.when_condition {
                let ctx = EvaluationContext::new(execution.inputs.clone())
                    .with_failure(self.has_failure(record.plan_execution_id).await?);
                match when.evaluate(&ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        let skip_type = match node.skip_graph_type {
                            SkipType::NoOp => SkipType::SkipNode,
                            other => other,
                        };
                        info!(identifier = %record.identifier, "When condition false, node skipped");
                        return self
                            .conclude(
                                record.uuid,
                                Status::Skipped,
                                NodePatch::default().skip_type(skip_type),
                            )
                            .await;
                    }
                    Err(e) => {
                        return self
                            .conclude(
                                record.uuid,
                                Status::Errored,
                                NodePatch::default().failure(e.to_string()),
                            )
                            .await;
                    }
                }
            }

            let Some(step) = self.inner.steps.get(&node.step_type.type_name) else {
                let message = format!("no step registered for {}", node.step_type.type_name);
                return self
                    .conclude(record.uuid, Status::Errored, NodePatch::default().failure(message))
                    .await;
            };

            let running = match self
                .inner
                .store
                .transition_node_status(record.uuid, Status::Running)
                .await
            {
                Ok(running) => running,
                Err(e) if e.is_terminal_conflict() => {
                    debug!(node_execution_id = %record.uuid, "Node concluded before it ran");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            self.emit(&OrchestrationEvent::node_status_updated(
                running.plan_execution_id,
                running.uuid,
                record.status,
                Status::Running,
            ));

            let ctx = self.step_context(&running, &node, execution.inputs);
            match step {
                StepExecutable::Sync(step) => {
                    let timer = SpanTimer::start(running.identifier.clone());
                    let result = step.execute(&ctx).await;
                    let attributes = NodeSpanAttributes::new(running.identifier.clone())
                        .with_step_type(node.step_type.type_name.clone())
                        .with_mode(running.mode)
                        .with_duration_ms(timer.finish());
                    debug!(attributes = ?attributes.to_otel_attributes(), "Sync step executed");
                    self.conclude_step(running.uuid, result).await
                }
                StepExecutable::Async(step) => {
                    self.start_async(&running, &node, step.as_ref(), &ctx).await
                }
                StepExecutable::Child(step) => match step.obtain_child(&ctx).await {
                    Ok(child) => {
                        self.start_node(NodeLaunch::child(PendingChild::new(child), &running))
                            .await
                    }
                    Err(e) => self.conclude_step(running.uuid, Err(e)).await,
                },
                StepExecutable::Children(step) => match step.obtain_children(&ctx).await {
                    Ok(spec) => self.start_children(&running, spec).await,
                    Err(e) => self.conclude_step(running.uuid, Err(e)).await,
                },
            }
        }
        .boxed()
    }

    async fn start_async(
        &self,
        record: &NodeExecution,
        node: &PlanNode,
        step: &dyn AsyncStep,
        ctx: &StepContext,
    ) -> Result<(), EngineError> {
        let start = match step.start(ctx).await {
            Ok(start) => start,
            Err(e) => {
                self.discard_pending_launches(record.uuid).await?;
                return self.conclude_step(record.uuid, Err(e)).await;
            }
        };
        if start.callback_ids.is_empty() {
            let result = step.handle_response(ctx, &BTreeMap::new()).await;
            return self.conclude_step(record.uuid, result).await;
        }

        let timeout = node.timeout_ms.map_or_else(
            || self.inner.config.default_task_timeout(),
            Duration::from_millis,
        );
        let expires_at = earliest(start.expires_at, deadline_after(now_utc(), timeout));
        self.inner
            .store
            .register_callbacks(record.uuid, start.callback_ids.clone(), expires_at)
            .await?;

        match self
            .inner
            .store
            .transition_node_status(record.uuid, Status::AsyncWaiting)
            .await
        {
            Ok(_) => self.emit(&OrchestrationEvent::node_status_updated(
                record.plan_execution_id,
                record.uuid,
                Status::Running,
                Status::AsyncWaiting,
            )),
            Err(e) if e.is_terminal_conflict() => {
                debug!(node_execution_id = %record.uuid, "Node concluded while starting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        debug!(
            identifier = %record.identifier,
            callbacks = ?start.callback_ids,
            "Node waiting on callbacks"
        );
        self.launch_pending_children(record.uuid).await
    }

    /// Hands the collected responses of a waiting node to its step.
    pub(super) async fn resume_async(
        &self,
        record: NodeExecution,
        responses: BTreeMap<String, Value>,
    ) -> Result<(), EngineError> {
        let plan = self.inner.store.get_plan(&record.ambiance.plan_id).await?;
        let node = match plan_node(&plan, &record.plan_node_id) {
            Ok(node) => node,
            Err(e) => return self.force_errored(record.uuid, e).await,
        };
        let Some(StepExecutable::Async(step)) = self.inner.steps.get(&node.step_type.type_name)
        else {
            let cause = EngineError::CorruptState(format!(
                "node {} waits on callbacks but {} is not an async step",
                record.uuid, node.step_type.type_name
            ));
            return self.force_errored(record.uuid, cause).await;
        };
        let execution = self
            .inner
            .store
            .get_plan_execution(record.plan_execution_id)
            .await?;
        let ctx = self.step_context(&record, node, execution.inputs);
        let result = step.handle_response(&ctx, &responses).await;
        self.conclude_step(record.uuid, result).await
    }

    async fn launch_pending_children(&self, node_execution_id: Uuid) -> Result<(), EngineError> {
        let Some((_, children)) = self.inner.pending_launches.remove(&node_execution_id) else {
            return Ok(());
        };
        for child in children {
            self.run_execution(child).await?;
        }
        Ok(())
    }

    async fn discard_pending_launches(&self, node_execution_id: Uuid) -> Result<(), EngineError> {
        let Some((_, children)) = self.inner.pending_launches.remove(&node_execution_id) else {
            return Ok(());
        };
        for child in children {
            self.conclude_execution(child, Status::Aborted).await?;
        }
        Ok(())
    }

    async fn start_children(
        &self,
        parent: &NodeExecution,
        spec: ChildrenSpec,
    ) -> Result<(), EngineError> {
        let total = spec.children.len();
        if total == 0 {
            return self.conclude_parent(parent.uuid).await;
        }
        let cap = spec
            .max_concurrency
            .or(self.inner.config.default_max_concurrency)
            .unwrap_or(total)
            .clamp(1, total);
        let mut children = spec.children;
        let deferred = children.split_off(cap);
        debug!(
            identifier = %parent.identifier,
            total,
            started = children.len(),
            "Starting children"
        );
        self.inner
            .store
            .init_children(parent.uuid, total, deferred)
            .await?;

        let launches = children
            .into_iter()
            .map(|child| self.start_node(NodeLaunch::child(child, parent)));
        join_all(launches).await.into_iter().collect()
    }

    /// Moves a node to a terminal status, applies `patch` and advises it.
    ///
    /// A node that already concluded keeps its status; the late result is
    /// dropped.
    pub(super) fn conclude(&self, id: Uuid, status: Status, patch: NodePatch) -> EngineFuture<'_> {
        async move {
            let before = self.inner.store.get_node_execution(id).await?;
            match self.inner.store.transition_node_status(id, status).await {
                Ok(_) => {}
                Err(e) if e.is_terminal_conflict() => {
                    debug!(
                        node_execution_id = %id,
                        current = %before.status,
                        dropped = %status,
                        "Node already concluded, result ignored"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
            self.emit(&OrchestrationEvent::node_status_updated(
                before.plan_execution_id,
                id,
                before.status,
                status,
            ));

            let record = if patch == NodePatch::default() {
                self.inner.store.get_node_execution(id).await?
            } else {
                self.inner.store.patch_node(id, patch).await?
            };
            self.emit(&OrchestrationEvent::node_concluded(
                record.plan_execution_id,
                id,
                status,
            ));
            info!(
                identifier = %record.identifier,
                %status,
                failure = record.failure_message.as_deref().unwrap_or_default(),
                "Node concluded"
            );
            self.advise(record).await
        }
        .boxed()
    }

    /// Concludes a node with the result of its step.
    pub(super) async fn conclude_step(
        &self,
        id: Uuid,
        result: Result<Value, StepError>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(outcome) => {
                self.conclude(id, Status::Succeeded, NodePatch::default().outcome(outcome))
                    .await
            }
            Err(e) => {
                let status = e.status();
                warn!(node_execution_id = %id, %status, error = %e, "Step failed");
                self.conclude(id, status, NodePatch::default().failure(e.to_string()))
                    .await
            }
        }
    }

    /// Forces a node whose stored state is inconsistent into ERRORED.
    pub(super) async fn force_errored(&self, id: Uuid, cause: EngineError) -> Result<(), EngineError> {
        error!(node_execution_id = %id, error = %cause, "Inconsistent state, node errored");
        self.conclude(id, Status::Errored, NodePatch::default().failure(cause.to_string()))
            .await
    }

    /// True if any current node of the execution failed without the failure
    /// being ignored.
    async fn has_failure(&self, plan_execution_id: Uuid) -> Result<bool, EngineError> {
        Ok(self
            .inner
            .store
            .fetch_node_executions(plan_execution_id)
            .await?
            .iter()
            .any(|n| !n.old_retry && n.status.is_failure() && !n.failure_ignored))
    }
}
