//! Advisement: routing a concluded node to whatever comes next.

use futures::future::FutureExt;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::facilitation::{plan_node, NodeLaunch};
use super::{EngineFuture, OrchestrationEngine};
use crate::core::ExecutionMode;
use crate::errors::{EngineError, StoreError};
use crate::execution::{NodeExecution, NodePatch};
use crate::interrupts::{InterruptConfig, InterruptRequest, InterruptType};
use crate::plan::{AdviserObtainment, ExhaustedAction};
use crate::steps::{aggregate_children, StepExecutable};

impl OrchestrationEngine {
    /// Runs the advisers of a concluded node. Each node is advised once.
    pub(super) fn advise(&self, record: NodeExecution) -> EngineFuture<'_> {
        async move {
            if !self.inner.store.mark_advised(record.uuid).await? {
                debug!(node_execution_id = %record.uuid, "Node already advised");
                return Ok(());
            }
            let plan = self.inner.store.get_plan(&record.ambiance.plan_id).await?;
            let node = plan_node(&plan, &record.plan_node_id)?;

            for adviser in &node.adviser_obtainments {
                if !adviser.can_advise(record.status, record.failure_ignored) {
                    continue;
                }
                match adviser {
                    AdviserObtainment::NextStep { next_node_id } => {
                        return self
                            .start_node(NodeLaunch::successor(next_node_id.clone(), &record))
                            .await;
                    }
                    AdviserObtainment::Retry {
                        retry_count,
                        on_exhausted,
                        ..
                    } => {
                        if record.retry_index < *retry_count {
                            let attempt = record.retry_index + 1;
                            let wait = adviser.retry_wait_ms(attempt);
                            info!(
                                identifier = %record.identifier,
                                attempt,
                                of = *retry_count,
                                wait_ms = wait,
                                "Retrying node"
                            );
                            let previous = self
                                .inner
                                .store
                                .patch_node(record.uuid, NodePatch::default().old_retry())
                                .await?;
                            if wait > 0 {
                                tokio::time::sleep(Duration::from_millis(wait)).await;
                            }
                            return self.start_node(NodeLaunch::retry(&previous)).await;
                        }
                        match on_exhausted {
                            ExhaustedAction::MarkAsFailure => continue,
                            ExhaustedAction::Ignore => {
                                let next = node.next_node_id().map(str::to_string);
                                return self.ignore_failure(record, next).await;
                            }
                            ExhaustedAction::Abort => return self.abort_on_failure(&record).await,
                        }
                    }
                    AdviserObtainment::IgnoreFailure { next_node_id } => {
                        return self.ignore_failure(record, next_node_id.clone()).await;
                    }
                    AdviserObtainment::OnFail { next_node_id } => {
                        return match next_node_id {
                            Some(next) => {
                                self.start_node(NodeLaunch::successor(next.clone(), &record))
                                    .await
                            }
                            None => self.chain_end(record).await,
                        };
                    }
                    AdviserObtainment::AbortOnFailure => {
                        return self.abort_on_failure(&record).await;
                    }
                }
            }
            self.chain_end(record).await
        }
        .boxed()
    }

    async fn ignore_failure(
        &self,
        record: NodeExecution,
        next_node_id: Option<String>,
    ) -> Result<(), EngineError> {
        let record = self
            .inner
            .store
            .patch_node(record.uuid, NodePatch::default().ignore_failure())
            .await?;
        self.inner.graph.invalidate(record.plan_execution_id);
        info!(identifier = %record.identifier, status = %record.status, "Failure ignored");
        match next_node_id {
            Some(next) => self.start_node(NodeLaunch::successor(next, &record)).await,
            None => self.chain_end(record).await,
        }
    }

    async fn abort_on_failure(&self, record: &NodeExecution) -> Result<(), EngineError> {
        let reason = format!("{} failed with {}", record.identifier, record.status);
        let request = InterruptRequest::new(
            InterruptType::AbortAll,
            record.plan_execution_id,
            InterruptConfig::issued_by("system").with_reason(reason),
        );
        self.interrupt(request).await.map(|_| ())
    }

    /// Handles the end of a chain: concludes the parent or the execution.
    pub(super) fn chain_end(&self, record: NodeExecution) -> EngineFuture<'_> {
        async move {
            let Some(parent_id) = record.parent_id else {
                let roots: Vec<NodeExecution> = self
                    .inner
                    .store
                    .fetch_node_executions(record.plan_execution_id)
                    .await?
                    .into_iter()
                    .filter(|n| n.parent_id.is_none())
                    .collect();
                return self
                    .conclude_execution(record.plan_execution_id, aggregate_children(&roots))
                    .await;
            };

            let parent = self.inner.store.get_node_execution(parent_id).await?;
            if parent.is_terminal() {
                debug!(parent = %parent.identifier, "Parent already concluded");
                return Ok(());
            }
            match parent.mode {
                ExecutionMode::Child => self.conclude_parent(parent_id).await,
                ExecutionMode::Children => {
                    let progress = match self.inner.store.complete_child(parent_id).await {
                        Ok(progress) => progress,
                        Err(StoreError::NotFound { .. }) => {
                            debug!(parent = %parent.identifier, "No child tracking for parent");
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if let Some(next) = progress.next {
                        self.start_node(NodeLaunch::child(next, &parent)).await?;
                    }
                    if progress.remaining == 0 {
                        self.conclude_parent(parent_id).await?;
                    }
                    Ok(())
                }
                mode => {
                    let cause = EngineError::CorruptState(format!(
                        "node {} has children but runs in {mode} mode",
                        parent.uuid
                    ));
                    self.force_errored(parent_id, cause).await
                }
            }
        }
        .boxed()
    }

    /// Concludes a CHILD or CHILDREN node from the state of its children.
    pub(super) async fn conclude_parent(&self, parent_id: Uuid) -> Result<(), EngineError> {
        let parent = self.inner.store.get_node_execution(parent_id).await?;
        let plan = self.inner.store.get_plan(&parent.ambiance.plan_id).await?;
        let node = match plan_node(&plan, &parent.plan_node_id) {
            Ok(node) => node,
            Err(e) => return self.force_errored(parent_id, e).await,
        };
        let children: Vec<NodeExecution> = self
            .inner
            .store
            .fetch_children(parent_id)
            .await?
            .into_iter()
            .filter(|c| !c.old_retry)
            .collect();
        let inputs = self
            .inner
            .store
            .get_plan_execution(parent.plan_execution_id)
            .await?
            .inputs;
        let ctx = self.step_context(&parent, node, inputs);

        let result = match self.inner.steps.get(&node.step_type.type_name) {
            Some(StepExecutable::Child(step)) => step.handle_child_response(&ctx, &children).await,
            Some(StepExecutable::Children(step)) => {
                step.handle_children_response(&ctx, &children).await
            }
            _ => {
                let cause = EngineError::CorruptState(format!(
                    "node {parent_id} has children but {} does not take any",
                    node.step_type.type_name
                ));
                return self.force_errored(parent_id, cause).await;
            }
        };

        match result {
            Ok(status) if status.is_failure() => {
                let failed: Vec<&str> = children
                    .iter()
                    .filter(|c| c.effective_status().is_failure())
                    .map(|c| c.identifier.as_str())
                    .collect();
                let message = format!("children failed: {}", failed.join(", "));
                self.conclude(parent_id, status, NodePatch::default().failure(message))
                    .await
            }
            Ok(status) => self.conclude(parent_id, status, NodePatch::default()).await,
            Err(e) => {
                self.conclude(parent_id, e.status(), NodePatch::default().failure(e.to_string()))
                    .await
            }
        }
    }
}
