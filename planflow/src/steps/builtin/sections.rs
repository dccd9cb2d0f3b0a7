//! Structural steps: sections, forks and strategies.

use async_trait::async_trait;
use serde_json::Value;

use crate::creation::strategy::{expand, MAX_CONCURRENCY, STRATEGY_CONFIG};
use crate::errors::StepError;
use crate::execution::PendingChild;
use crate::plan::{CHILD_NODE_ID, PARALLEL_NODE_IDS};
use crate::steps::context::StepContext;
use crate::steps::executable::{ChildStep, ChildrenSpec, ChildrenStep};

/// Runs the chain headed by the `childNodeId` parameter.
///
/// Serves pipeline, stages, stage, execution and step group nodes alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionChainStep;

#[async_trait]
impl ChildStep for SectionChainStep {
    async fn obtain_child(&self, ctx: &StepContext) -> Result<String, StepError> {
        ctx.string_parameter(CHILD_NODE_ID).map(str::to_string)
    }
}

/// Runs every branch of a parallel block at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkStep;

#[async_trait]
impl ChildrenStep for ForkStep {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<ChildrenSpec, StepError> {
        let ids = ctx
            .parameters()
            .get(PARALLEL_NODE_IDS)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StepError::InvalidParameters(format!(
                    "missing list parameter '{PARALLEL_NODE_IDS}'"
                ))
            })?;
        let children = ids
            .iter()
            .map(|id| {
                id.as_str().map(PendingChild::new).ok_or_else(|| {
                    StepError::InvalidParameters(format!("non-string branch id {id}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChildrenSpec::new(children))
    }
}

/// Runs the wrapped node once per strategy iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyStep;

#[async_trait]
impl ChildrenStep for StrategyStep {
    async fn obtain_children(&self, ctx: &StepContext) -> Result<ChildrenSpec, StepError> {
        let child = ctx.string_parameter(CHILD_NODE_ID)?;
        let strategy = ctx.parameters().get(STRATEGY_CONFIG).ok_or_else(|| {
            StepError::InvalidParameters(format!("missing parameter '{STRATEGY_CONFIG}'"))
        })?;
        let iterations = expand(strategy).map_err(StepError::InvalidParameters)?;
        let max = ctx
            .parameters()
            .get(MAX_CONCURRENCY)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok());
        Ok(ChildrenSpec::new(
            iterations
                .into_iter()
                .map(|metadata| PendingChild::iteration(child, metadata))
                .collect(),
        )
        .with_max_concurrency(max))
    }
}
