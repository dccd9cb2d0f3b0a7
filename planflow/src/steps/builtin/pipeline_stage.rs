//! Pipeline chaining: a stage that runs another pipeline.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::Status;
use crate::errors::StepError;
use crate::interrupts::{Interrupt, InterruptRequest, InterruptType};
use crate::steps::context::StepContext;
use crate::steps::executable::{AsyncStart, AsyncStep};

/// Output key holding the nested execution id.
pub const CHILD_EXECUTION_ID: &str = "childExecutionId";

/// Starts the nested pipeline and waits for it to conclude.
///
/// The nested execution id doubles as the callback id. Aborting the stage
/// aborts the whole nested execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStageStep;

#[async_trait]
impl AsyncStep for PipelineStageStep {
    async fn start(&self, ctx: &StepContext) -> Result<AsyncStart, StepError> {
        let definition = ctx
            .parameters()
            .get("pipeline")
            .ok_or_else(|| StepError::InvalidParameters("missing parameter 'pipeline'".into()))?;
        let inputs = ctx.parameters().get("inputs").cloned().unwrap_or_else(|| json!({}));
        let child = ctx
            .handle()
            .create_child_execution(ctx, definition, inputs)
            .await
            .map_err(|e| StepError::ChildExecution(e.to_string()))?;
        ctx.store()
            .put_output(ctx.node_execution_id(), CHILD_EXECUTION_ID, json!(child))
            .await
            .map_err(|e| StepError::ChildExecution(e.to_string()))?;
        info!(
            node_execution_id = %ctx.node_execution_id(),
            child_execution_id = %child,
            "Child pipeline created"
        );
        Ok(AsyncStart::single(child.to_string()))
    }

    async fn handle_response(
        &self,
        ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<Value, StepError> {
        let store = ctx.store();
        let child: Uuid = store
            .get_output(ctx.node_execution_id(), CHILD_EXECUTION_ID)
            .await
            .map_err(|e| StepError::MissingState(e.to_string()))?
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| StepError::MissingState(format!("no {CHILD_EXECUTION_ID} output")))?;
        let status: Status = responses
            .get(&child.to_string())
            .and_then(|r| r.get("status"))
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .ok_or_else(|| StepError::MissingState(format!("no status for child {child}")))?;

        let nodes = store
            .fetch_node_executions(child)
            .await
            .map_err(|e| StepError::MissingState(e.to_string()))?;
        let last = nodes.iter().filter(|n| !n.old_retry).max_by_key(|n| n.sequence);
        let outcome = json!({
            CHILD_EXECUTION_ID: child,
            "status": status,
            "lastNode": last.map(|n| json!({
                "identifier": n.identifier,
                "status": n.status,
                "outcome": n.outcome,
            })),
        });
        if status == Status::Succeeded {
            Ok(outcome)
        } else {
            Err(StepError::Failed(format!("child pipeline {child} ended {status}")))
        }
    }

    async fn handle_abort(
        &self,
        ctx: &StepContext,
        callback_ids: &[String],
        interrupt: &Interrupt,
    ) -> Result<(), StepError> {
        let Some(child) = callback_ids.last().and_then(|id| Uuid::parse_str(id).ok()) else {
            return Ok(());
        };
        let request = InterruptRequest::new(
            InterruptType::AbortAll,
            child,
            interrupt.config.derived_from(interrupt.uuid),
        );
        match ctx.handle().register_interrupt(request).await {
            Ok(outcome) => info!(
                child_execution_id = %child,
                interrupt_id = %outcome.interrupt_id(),
                "Abort propagated to child pipeline"
            ),
            Err(e) => warn!(child_execution_id = %child, error = %e, "Abort propagation failed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::{Ambiance, ExecutionMetadata};
    use crate::core::{ExecutionMode, StepCategory, StepType};
    use crate::execution::{ExecutionStore, NodeExecution};
    use crate::interrupts::InterruptConfig;
    use crate::plan::PlanNode;
    use crate::testing::{step_context, StaticHandle};

    fn stage() -> PlanNode {
        PlanNode::new(
            "ps",
            "chained",
            StepType::new("PIPELINE_STAGE", StepCategory::Stage),
            ExecutionMode::Async,
        )
        .with_parameters(json!({
            "pipeline": {"pipeline": {"identifier": "child"}},
            "inputs": {"tag": "v1"}
        }))
    }

    #[tokio::test]
    async fn test_start_creates_child_and_publishes_id() {
        let handle = StaticHandle::new();
        let ctx = step_context(handle.clone(), stage());
        let start = PipelineStageStep.start(&ctx).await.unwrap();

        let created = handle.child_executions();
        assert_eq!(created.len(), 1);
        assert_eq!(start.callback_ids, vec![created[0].0.to_string()]);
        assert_eq!(created[0].2["tag"], "v1");
        let output = handle
            .memory_store()
            .get_output(ctx.node_execution_id(), CHILD_EXECUTION_ID)
            .await
            .unwrap();
        assert_eq!(output, Some(json!(created[0].0)));
    }

    #[tokio::test]
    async fn test_response_reports_last_child_node() {
        let handle = StaticHandle::new();
        let ctx = step_context(handle.clone(), stage());
        let start = PipelineStageStep.start(&ctx).await.unwrap();
        let child = handle.child_executions()[0].0;

        let leaf = PlanNode::new(
            "l",
            "leaf",
            StepType::new("Echo", StepCategory::Step),
            ExecutionMode::Sync,
        );
        let ambiance = Ambiance::new(
            child,
            "child",
            BTreeMap::new(),
            ExecutionMetadata::manual("t"),
        );
        let mut record = NodeExecution::queued(Uuid::new_v4(), &leaf, ambiance);
        record.status = Status::Succeeded;
        handle.memory_store().append_node_execution(record).await.unwrap();

        let ok = BTreeMap::from([(
            start.callback_ids[0].clone(),
            json!({"status": "SUCCEEDED"}),
        )]);
        let outcome = PipelineStageStep.handle_response(&ctx, &ok).await.unwrap();
        assert_eq!(outcome["lastNode"]["identifier"], "leaf");
        assert_eq!(outcome["status"], "SUCCEEDED");

        let failed = BTreeMap::from([(
            start.callback_ids[0].clone(),
            json!({"status": "FAILED"}),
        )]);
        assert!(PipelineStageStep.handle_response(&ctx, &failed).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_targets_child_execution() {
        let handle = StaticHandle::new();
        let ctx = step_context(handle.clone(), stage());
        let child = Uuid::new_v4();
        let parent_abort = Interrupt::from_request(InterruptRequest::new(
            InterruptType::AbortAll,
            ctx.plan_execution_id(),
            InterruptConfig::issued_by("alice"),
        ));
        PipelineStageStep
            .handle_abort(&ctx, &[child.to_string()], &parent_abort)
            .await
            .unwrap();

        let sent = handle.interrupts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].plan_execution_id, child);
        assert_eq!(sent[0].interrupt_type, InterruptType::AbortAll);
        assert_eq!(sent[0].config.source_interrupt_id, Some(parent_abort.uuid));
        assert_eq!(sent[0].config.issued_by, "alice");
    }
}
