//! Steps that delegate their work to a remote worker.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::dispatch::{TaskMode, TaskResponse, TaskResponseStatus, TaskSpec};
use crate::errors::{DispatchError, StepError};
use crate::interrupts::Interrupt;
use crate::steps::context::StepContext;
use crate::steps::executable::{AsyncStart, AsyncStep, SyncStep};

fn task_spec(ctx: &StepContext, task_type: &str, mode: TaskMode) -> TaskSpec {
    let mut spec = TaskSpec::new(
        task_type,
        mode,
        json!({
            "stepType": ctx.plan_node().step_type.type_name,
            "identifier": ctx.plan_node().identifier,
            "nodeExecutionId": ctx.node_execution_id(),
            "retryIndex": ctx.retry_index(),
            "parameters": ctx.parameters(),
        }),
    );
    if let Some(timeout_ms) = ctx.plan_node().timeout_ms {
        spec = spec.with_timeout_ms(timeout_ms);
    }
    if let Some(account) = ctx.ambiance().account_id() {
        spec = spec.with_account(account);
    }
    spec
}

fn outcome_of(response: TaskResponse) -> Result<Value, StepError> {
    match response.status {
        TaskResponseStatus::Success => Ok(response.payload),
        TaskResponseStatus::Failure => Err(StepError::Failed(
            response
                .error_message
                .unwrap_or_else(|| format!("task {} failed", response.task_id)),
        )),
        TaskResponseStatus::Error => Err(StepError::Dispatch(DispatchError::Transport(
            response
                .error_message
                .unwrap_or_else(|| format!("task {} errored", response.task_id)),
        ))),
    }
}

/// Submits an async task and resumes when the worker reports back.
///
/// The task id is the callback id, and the server-computed task expiry is
/// the step deadline.
#[derive(Debug, Clone)]
pub struct DelegateTaskStep {
    task_type: String,
}

impl DelegateTaskStep {
    /// Delegates to workers of `task_type`.
    #[must_use]
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
        }
    }
}

#[async_trait]
impl AsyncStep for DelegateTaskStep {
    async fn start(&self, ctx: &StepContext) -> Result<AsyncStart, StepError> {
        let ack = ctx
            .dispatcher()
            .submit_async(task_spec(ctx, &self.task_type, TaskMode::Async))
            .await?;
        debug!(
            node_execution_id = %ctx.node_execution_id(),
            task_id = %ack.task_id,
            "Delegated task"
        );
        Ok(AsyncStart::single(ack.task_id).with_expiry(ack.total_expiry))
    }

    async fn handle_response(
        &self,
        _ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<Value, StepError> {
        let (task_id, raw) = responses
            .iter()
            .next_back()
            .ok_or_else(|| StepError::MissingState("no task response".to_string()))?;
        let response: TaskResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            StepError::InvalidParameters(format!("malformed response for task {task_id}: {e}"))
        })?;
        outcome_of(response)
    }

    async fn handle_abort(
        &self,
        ctx: &StepContext,
        callback_ids: &[String],
        _interrupt: &Interrupt,
    ) -> Result<(), StepError> {
        // Only the latest attempt can still be running.
        if let Some(task_id) = callback_ids.last() {
            if !ctx.dispatcher().cancel(task_id).await {
                warn!(task_id = %task_id, "Worker did not acknowledge abort");
            }
        }
        Ok(())
    }
}

/// Submits a sync task and waits for the worker inline.
#[derive(Debug, Clone)]
pub struct SyncDelegateStep {
    task_type: String,
}

impl SyncDelegateStep {
    /// Delegates to workers of `task_type`.
    #[must_use]
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
        }
    }
}

#[async_trait]
impl SyncStep for SyncDelegateStep {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let response = ctx
            .dispatcher()
            .submit_sync(task_spec(ctx, &self.task_type, TaskMode::Sync))
            .await?;
        outcome_of(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionMode, Status, StepCategory, StepType};
    use crate::dispatch::InMemoryWorkerTransport;
    use crate::interrupts::{InterruptConfig, InterruptRequest, InterruptType};
    use crate::plan::PlanNode;
    use crate::testing::{step_context, StaticHandle};
    use std::sync::Arc;
    use uuid::Uuid;

    fn shell_node() -> PlanNode {
        PlanNode::new(
            "sh",
            "build",
            StepType::new("ShellScript", StepCategory::Step),
            ExecutionMode::Async,
        )
        .with_parameters(json!({"script": "make"}))
        .with_timeout_ms(5_000)
    }

    #[tokio::test]
    async fn test_async_delegate_waits_on_task_id() {
        let transport = Arc::new(InMemoryWorkerTransport::new());
        let handle = StaticHandle::with_transport(transport.clone());
        let ctx = step_context(handle, shell_node());
        let step = DelegateTaskStep::new("SHELL_SCRIPT");

        let start = step.start(&ctx).await.unwrap();
        assert_eq!(start.callback_ids, transport.pending_tasks());
        assert!(start.expires_at.is_some());
        let task = transport.task(&start.callback_ids[0]).unwrap();
        assert_eq!(task.timeout_ms, Some(5_000));
        assert_eq!(task.parameters["parameters"]["script"], "make");

        let ok = TaskResponse::success(start.callback_ids[0].clone(), json!({"exit": 0}));
        let responses = BTreeMap::from([(ok.task_id.clone(), serde_json::to_value(&ok).unwrap())]);
        assert_eq!(step.handle_response(&ctx, &responses).await.unwrap()["exit"], 0);

        let failed = TaskResponse::failure(start.callback_ids[0].clone(), "exit 1");
        let responses =
            BTreeMap::from([(failed.task_id.clone(), serde_json::to_value(&failed).unwrap())]);
        let err = step.handle_response(&ctx, &responses).await.unwrap_err();
        assert_eq!(err.status(), Status::Failed);
    }

    #[tokio::test]
    async fn test_abort_cancels_latest_task() {
        let transport = Arc::new(InMemoryWorkerTransport::new());
        let ctx = step_context(StaticHandle::with_transport(transport.clone()), shell_node());
        let interrupt = Interrupt::from_request(InterruptRequest::new(
            InterruptType::Abort,
            Uuid::new_v4(),
            InterruptConfig::issued_by("tester"),
        ));
        DelegateTaskStep::new("SHELL_SCRIPT")
            .handle_abort(&ctx, &["task-1".to_string(), "task-2".to_string()], &interrupt)
            .await
            .unwrap();
        assert_eq!(transport.aborted(), vec!["task-2".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_delegate_uses_sync_path() {
        let transport = Arc::new(
            InMemoryWorkerTransport::new().with_auto_responder(|_| Some(json!({"code": 200}))),
        );
        let node = PlanNode::new(
            "h",
            "call",
            StepType::new("Http", StepCategory::Step),
            ExecutionMode::Sync,
        );
        let ctx = step_context(StaticHandle::with_transport(transport), node);
        let outcome = SyncDelegateStep::new("HTTP").execute(&ctx).await.unwrap();
        assert_eq!(outcome["code"], 200);
    }
}
