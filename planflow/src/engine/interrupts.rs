//! Interrupt handling: abort, pause, resume and expire.

use futures::future::{join_all, FutureExt};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::facilitation::plan_node;
use super::{EngineFuture, OrchestrationEngine};
use crate::core::{event_names, ExecutionMode, OrchestrationEvent, Status};
use crate::errors::{EngineError, InterruptError, StoreError};
use crate::execution::{InterruptRegistration, NodeExecution, NodePatch};
use crate::interrupts::{Interrupt, InterruptOutcome, InterruptRequest, InterruptState, InterruptType};
use crate::steps::StepExecutable;

/// What applying an interrupt amounted to.
enum Applied {
    Handled,
    Ignored(String),
}

fn interrupt_event(event_type: &str, interrupt: &Interrupt) -> OrchestrationEvent {
    let mut event = OrchestrationEvent::new(event_type)
        .add_data("interruptId", json!(interrupt.uuid))
        .add_data("interruptType", json!(interrupt.interrupt_type.to_string()))
        .add_data("planExecutionId", json!(interrupt.plan_execution_id))
        .add_data("issuedBy", json!(interrupt.config.issued_by));
    if let Some(node) = interrupt.node_execution_id {
        event = event.add_data("nodeExecutionId", json!(node));
    }
    event
}

impl OrchestrationEngine {
    /// Registers an interrupt and applies it.
    ///
    /// An abort or pause that is still active for the same target is not
    /// applied twice; the second request gets
    /// [`InterruptOutcome::AlreadyPending`].
    pub async fn register_interrupt(
        &self,
        request: InterruptRequest,
    ) -> Result<InterruptOutcome, EngineError> {
        self.interrupt(request).await
    }

    pub(super) fn interrupt(&self, request: InterruptRequest) -> EngineFuture<'_, InterruptOutcome> {
        async move {
            let plan_execution_id = request.plan_execution_id;
            let execution = match self.inner.store.get_plan_execution(plan_execution_id).await {
                Ok(execution) => execution,
                Err(StoreError::NotFound { .. }) => {
                    return Err(InterruptError::ExecutionNotFound(plan_execution_id).into())
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(node_execution_id) = request.node_execution_id {
                let node_not_found = InterruptError::NodeNotFound {
                    plan_execution_id,
                    node_execution_id,
                };
                match self.inner.store.get_node_execution(node_execution_id).await {
                    Ok(node) if node.plan_execution_id == plan_execution_id => {}
                    Ok(_) | Err(StoreError::NotFound { .. }) => return Err(node_not_found.into()),
                    Err(e) => return Err(e.into()),
                }
            } else if request.interrupt_type == InterruptType::Expire {
                return Err(InterruptError::MissingNodeTarget(InterruptType::Expire.to_string()).into());
            }

            let interrupt = match self
                .inner
                .store
                .register_interrupt(Interrupt::from_request(request))
                .await?
            {
                InterruptRegistration::Registered(interrupt) => interrupt,
                InterruptRegistration::Existing(existing) => {
                    debug!(
                        %plan_execution_id,
                        interrupt_id = %existing.uuid,
                        interrupt_type = %existing.interrupt_type,
                        "Interrupt already pending"
                    );
                    return Ok(InterruptOutcome::AlreadyPending {
                        interrupt_id: existing.uuid,
                    });
                }
            };
            self.emit(&interrupt_event(event_names::INTERRUPT_REGISTERED, &interrupt));
            info!(
                %plan_execution_id,
                interrupt_id = %interrupt.uuid,
                interrupt_type = %interrupt.interrupt_type,
                issued_by = %interrupt.config.issued_by,
                "Interrupt registered"
            );

            if execution.status.is_terminal() {
                return self
                    .discard(&interrupt, format!("execution already {}", execution.status))
                    .await;
            }

            self.inner
                .store
                .update_interrupt_state(plan_execution_id, interrupt.uuid, InterruptState::Processing)
                .await?;
            match self.apply(&interrupt).await? {
                Applied::Handled => {
                    if !interrupt.interrupt_type.is_sticky() {
                        self.inner
                            .store
                            .update_interrupt_state(
                                plan_execution_id,
                                interrupt.uuid,
                                InterruptState::Processed,
                            )
                            .await?;
                    }
                    self.emit(&interrupt_event(event_names::INTERRUPT_HANDLED, &interrupt));
                    Ok(InterruptOutcome::Registered {
                        interrupt_id: interrupt.uuid,
                    })
                }
                Applied::Ignored(reason) => self.discard(&interrupt, reason).await,
            }
        }
        .boxed()
    }

    async fn discard(
        &self,
        interrupt: &Interrupt,
        reason: String,
    ) -> Result<InterruptOutcome, EngineError> {
        self.inner
            .store
            .update_interrupt_state(
                interrupt.plan_execution_id,
                interrupt.uuid,
                InterruptState::Discarded,
            )
            .await?;
        self.emit(
            &interrupt_event(event_names::INTERRUPT_IGNORED, interrupt)
                .add_data("reason", json!(reason)),
        );
        info!(interrupt_id = %interrupt.uuid, %reason, "Interrupt ignored");
        Ok(InterruptOutcome::Ignored {
            interrupt_id: interrupt.uuid,
            reason,
        })
    }

    async fn apply(&self, interrupt: &Interrupt) -> Result<Applied, EngineError> {
        match (&interrupt.interrupt_type, interrupt.node_execution_id) {
            (InterruptType::AbortAll, _) | (InterruptType::Abort, None) => {
                self.abort_execution(interrupt).await?;
                Ok(Applied::Handled)
            }
            (InterruptType::Abort, Some(node)) => self.abort_node(interrupt, node).await,
            (InterruptType::Pause, _) => self.pause(interrupt.plan_execution_id).await,
            (InterruptType::Resume, _) => self.resume(interrupt.plan_execution_id).await,
            (InterruptType::Expire, Some(node)) => self.expire_node(interrupt, node).await,
            (InterruptType::Expire, None) => Err(InterruptError::MissingNodeTarget(
                InterruptType::Expire.to_string(),
            )
            .into()),
            (InterruptType::Custom(name), _) => {
                debug!(interrupt_id = %interrupt.uuid, %name, "Custom interrupt recorded");
                Ok(Applied::Handled)
            }
        }
    }

    async fn abort_execution(&self, interrupt: &Interrupt) -> Result<(), EngineError> {
        let plan_execution_id = interrupt.plan_execution_id;
        let reason = interrupt
            .config
            .reason
            .clone()
            .unwrap_or_else(|| format!("aborted by {}", interrupt.config.issued_by));
        self.inner
            .tokens
            .cancel(plan_execution_id, interrupt.uuid, &reason);

        let mut open: Vec<NodeExecution> = self
            .inner
            .store
            .fetch_node_executions(plan_execution_id)
            .await?
            .into_iter()
            .filter(|n| !n.is_terminal())
            .collect();
        open.sort_by(|a, b| {
            b.ambiance
                .levels
                .len()
                .cmp(&a.ambiance.levels.len())
                .then(b.sequence.cmp(&a.sequence))
        });
        info!(%plan_execution_id, open = open.len(), %reason, "Aborting execution");
        for node in &open {
            self.abort_one(node, interrupt).await?;
        }
        let held = self.inner.store.take_paused(plan_execution_id).await?;
        debug!(%plan_execution_id, held = held.len(), "Released held nodes");
        self.conclude_execution(plan_execution_id, Status::Aborted).await
    }

    async fn abort_node(&self, interrupt: &Interrupt, target: Uuid) -> Result<Applied, EngineError> {
        let record = self.inner.store.get_node_execution(target).await?;
        if record.is_terminal() {
            return Ok(Applied::Ignored(format!(
                "node {} already {}",
                record.identifier, record.status
            )));
        }
        let mut descendants: Vec<NodeExecution> = self
            .inner
            .store
            .fetch_node_executions(interrupt.plan_execution_id)
            .await?
            .into_iter()
            .filter(|n| n.uuid != target && !n.is_terminal() && n.ambiance.runtime_ids().contains(&target))
            .collect();
        descendants.sort_by(|a, b| {
            b.ambiance
                .levels
                .len()
                .cmp(&a.ambiance.levels.len())
                .then(b.sequence.cmp(&a.sequence))
        });
        for node in &descendants {
            self.abort_one(node, interrupt).await?;
        }
        self.abort_one(&record, interrupt).await?;

        let aborted = self.inner.store.get_node_execution(target).await?;
        self.advise(aborted).await?;
        Ok(Applied::Handled)
    }

    /// Stops the outstanding work of a node.
    async fn stop_work(&self, node: &NodeExecution, interrupt: &Interrupt) -> Result<(), EngineError> {
        self.inner.store.clear_callbacks(node.uuid).await?;
        match node.mode {
            ExecutionMode::Async => {
                let callback_ids = self.inner.store.callback_ids_for(node.uuid).await?;
                if callback_ids.is_empty() {
                    return Ok(());
                }
                let plan = self.inner.store.get_plan(&node.ambiance.plan_id).await?;
                let definition = plan_node(&plan, &node.plan_node_id)?;
                if let Some(StepExecutable::Async(step)) =
                    self.inner.steps.get(&definition.step_type.type_name)
                {
                    let inputs = self
                        .inner
                        .store
                        .get_plan_execution(node.plan_execution_id)
                        .await?
                        .inputs;
                    let ctx = self.step_context(node, definition, inputs);
                    if let Err(e) = step.handle_abort(&ctx, &callback_ids, interrupt).await {
                        warn!(identifier = %node.identifier, error = %e, "Abort handler failed");
                    }
                }
            }
            ExecutionMode::Children => {
                let drained = self.inner.store.drain_deferred_children(node.uuid).await?;
                if drained > 0 {
                    debug!(identifier = %node.identifier, drained, "Deferred children dropped");
                }
            }
            ExecutionMode::Sync | ExecutionMode::Child => {}
        }
        Ok(())
    }

    /// Aborts one node without advising it.
    async fn abort_one(&self, node: &NodeExecution, interrupt: &Interrupt) -> Result<(), EngineError> {
        self.stop_work(node, interrupt).await?;
        let current = self.inner.store.get_node_execution(node.uuid).await?;
        match self
            .inner
            .store
            .transition_node_status(node.uuid, Status::Aborted)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_terminal_conflict() => {
                debug!(identifier = %node.identifier, "Node concluded before abort");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.emit(&OrchestrationEvent::node_status_updated(
            node.plan_execution_id,
            node.uuid,
            current.status,
            Status::Aborted,
        ));
        self.emit(&OrchestrationEvent::node_concluded(
            node.plan_execution_id,
            node.uuid,
            Status::Aborted,
        ));
        info!(identifier = %node.identifier, interrupt_id = %interrupt.uuid, "Node aborted");
        Ok(())
    }

    async fn pause(&self, plan_execution_id: Uuid) -> Result<Applied, EngineError> {
        match self
            .inner
            .store
            .update_plan_status(plan_execution_id, Status::Paused)
            .await
        {
            Ok(_) => {
                self.emit(&OrchestrationEvent::plan_status_updated(
                    plan_execution_id,
                    Status::Paused,
                ));
                info!(%plan_execution_id, "Execution paused");
                Ok(Applied::Handled)
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                Ok(Applied::Ignored(format!("execution is {from}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resume(&self, plan_execution_id: Uuid) -> Result<Applied, EngineError> {
        let execution = self.inner.store.get_plan_execution(plan_execution_id).await?;
        if execution.status != Status::Paused {
            return Ok(Applied::Ignored(format!(
                "execution is {}, not paused",
                execution.status
            )));
        }
        self.inner
            .store
            .update_plan_status(plan_execution_id, Status::Running)
            .await?;
        self.emit(&OrchestrationEvent::plan_status_updated(
            plan_execution_id,
            Status::Running,
        ));
        for pause in self
            .inner
            .store
            .active_interrupts(plan_execution_id)
            .await?
            .into_iter()
            .filter(|i| i.interrupt_type == InterruptType::Pause)
        {
            self.inner
                .store
                .update_interrupt_state(plan_execution_id, pause.uuid, InterruptState::Processed)
                .await?;
        }

        let held = self.inner.store.take_paused(plan_execution_id).await?;
        info!(%plan_execution_id, held = held.len(), "Execution resumed");
        let mut queued = Vec::with_capacity(held.len());
        for id in held {
            let record = self.inner.store.get_node_execution(id).await?;
            if record.status != Status::Paused {
                continue;
            }
            let record = self
                .inner
                .store
                .transition_node_status(id, Status::Queued)
                .await?;
            self.emit(&OrchestrationEvent::node_status_updated(
                plan_execution_id,
                id,
                Status::Paused,
                Status::Queued,
            ));
            queued.push(record);
        }
        join_all(queued.into_iter().map(|record| self.run_node(record)))
            .await
            .into_iter()
            .collect::<Result<(), EngineError>>()?;
        Ok(Applied::Handled)
    }

    async fn expire_node(&self, interrupt: &Interrupt, target: Uuid) -> Result<Applied, EngineError> {
        let record = self.inner.store.get_node_execution(target).await?;
        if record.is_terminal() || record.status != Status::AsyncWaiting {
            return Ok(Applied::Ignored(format!(
                "node {} is {}, not waiting",
                record.identifier, record.status
            )));
        }
        self.stop_work(&record, interrupt).await?;
        warn!(identifier = %record.identifier, "Node expired waiting on callbacks");
        self.conclude(
            target,
            Status::Expired,
            NodePatch::default().failure("expired waiting on callbacks"),
        )
        .await?;
        Ok(Applied::Handled)
    }
}
