//! When-conditions on stages and steps.

use serde::{Deserialize, Serialize};

use super::{EvaluationContext, ExpressionEvaluator};
use crate::errors::StepError;

/// Which pipeline outcome lets the node run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PipelineStatusFilter {
    /// Run only while nothing has failed.
    #[default]
    Success,
    /// Run only after a failure.
    Failure,
    /// Always run.
    All,
}

/// Decides whether a node runs or is recorded as skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WhenCondition {
    /// Pipeline outcome filter.
    #[serde(default)]
    pub pipeline_status: PipelineStatusFilter,
    /// Optional boolean expression, e.g. `<+inputs.env> == "prod"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WhenCondition {
    /// Creates a when-condition with a status filter only.
    #[must_use]
    pub fn new(pipeline_status: PipelineStatusFilter) -> Self {
        Self {
            pipeline_status,
            condition: None,
        }
    }

    /// Adds an expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Evaluates the condition.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Result<bool, StepError> {
        let status_ok = match self.pipeline_status {
            PipelineStatusFilter::Success => !ctx.has_failure,
            PipelineStatusFilter::Failure => ctx.has_failure,
            PipelineStatusFilter::All => true,
        };
        if !status_ok {
            return Ok(false);
        }
        match &self.condition {
            Some(expression) => ExpressionEvaluator::new().evaluate(expression, ctx),
            None => Ok(true),
        }
    }
}
