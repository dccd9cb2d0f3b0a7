//! Manual approval.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::conditions::{ConditionEvaluator, Criteria};
use crate::errors::StepError;
use crate::steps::context::StepContext;
use crate::steps::executable::{AsyncStart, AsyncStep};

/// The callback id an approver notifies for a node execution.
#[must_use]
pub fn approval_callback_id(node_execution_id: Uuid) -> String {
    format!("approval-{node_execution_id}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalParameters {
    #[serde(default)]
    approval_criteria: Criteria,
    #[serde(default)]
    rejection_criteria: Option<Criteria>,
}

/// Waits for an approver and judges their inputs against criteria.
///
/// Rejection criteria are checked first. The approver's payload must be a
/// JSON object of inputs.
#[derive(Clone)]
pub struct ApprovalStep {
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl ApprovalStep {
    /// Creates the step with a condition evaluator.
    #[must_use]
    pub fn new(evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        Self { evaluator }
    }
}

#[async_trait]
impl AsyncStep for ApprovalStep {
    async fn start(&self, ctx: &StepContext) -> Result<AsyncStart, StepError> {
        ctx.parameters_as::<ApprovalParameters>()?;
        info!(node_execution_id = %ctx.node_execution_id(), "Waiting for approval");
        Ok(AsyncStart::single(approval_callback_id(ctx.node_execution_id())))
    }

    async fn handle_response(
        &self,
        ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<Value, StepError> {
        let params: ApprovalParameters = ctx.parameters_as()?;
        let payload = responses
            .get(&approval_callback_id(ctx.node_execution_id()))
            .ok_or_else(|| StepError::MissingState("no approval response".to_string()))?;
        let empty = Map::new();
        let inputs = payload.as_object().unwrap_or(&empty);

        if let Some(rejection) = &params.rejection_criteria {
            if rejection.evaluate(inputs, self.evaluator.as_ref())? {
                return Err(StepError::Failed("rejected".to_string()));
            }
        }
        if params.approval_criteria.evaluate(inputs, self.evaluator.as_ref())? {
            Ok(json!({ "approved": true, "inputs": payload }))
        } else {
            Err(StepError::Failed("approval criteria not met".to_string()))
        }
    }
}

impl std::fmt::Debug for ApprovalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalStep").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::DefaultConditionEvaluator;
    use crate::core::{ExecutionMode, StepCategory, StepType};
    use crate::plan::PlanNode;
    use crate::testing::{step_context, StaticHandle};

    fn approval() -> (ApprovalStep, StepContext) {
        let node = PlanNode::new(
            "ap",
            "approve",
            StepType::new("Approval", StepCategory::Step),
            ExecutionMode::Async,
        )
        .with_parameters(json!({
            "approvalCriteria": {"conditions": [{"key": "decision", "operator": "EQUALS", "value": "yes"}]},
            "rejectionCriteria": {"conditions": [{"key": "decision", "operator": "EQUALS", "value": "no"}]}
        }));
        (
            ApprovalStep::new(Arc::new(DefaultConditionEvaluator)),
            step_context(StaticHandle::new(), node),
        )
    }

    fn respond(ctx: &StepContext, inputs: Value) -> BTreeMap<String, Value> {
        BTreeMap::from([(approval_callback_id(ctx.node_execution_id()), inputs)])
    }

    #[tokio::test]
    async fn test_start_waits_on_node_callback() {
        let (step, ctx) = approval();
        let start = step.start(&ctx).await.unwrap();
        assert_eq!(start.callback_ids, vec![approval_callback_id(ctx.node_execution_id())]);
    }

    #[tokio::test]
    async fn test_approval_verdicts() {
        let (step, ctx) = approval();
        let approved = step
            .handle_response(&ctx, &respond(&ctx, json!({"decision": "yes"})))
            .await
            .unwrap();
        assert_eq!(approved["approved"], true);

        let rejected = step
            .handle_response(&ctx, &respond(&ctx, json!({"decision": "no"})))
            .await;
        assert!(matches!(rejected, Err(StepError::Failed(m)) if m == "rejected"));

        let undecided = step
            .handle_response(&ctx, &respond(&ctx, json!({})))
            .await;
        assert!(matches!(undecided, Err(StepError::Failed(_))));
    }
}
