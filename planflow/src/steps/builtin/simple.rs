//! Inline steps.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::StepError;
use crate::steps::context::StepContext;
use crate::steps::executable::SyncStep;

/// Output key under which the service section publishes its service.
pub(crate) const SERVICE_OUTPUT: &str = "service";

/// Publishes the resolved service of a stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceConfigStep;

#[async_trait]
impl SyncStep for ServiceConfigStep {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        let service = ctx.parameters().clone();
        ctx.store()
            .put_output(ctx.node_execution_id(), SERVICE_OUTPUT, service.clone())
            .await
            .map_err(|e| StepError::MissingState(e.to_string()))?;
        Ok(json!({ SERVICE_OUTPUT: service }))
    }
}

/// Returns its parameters as the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoStep;

#[async_trait]
impl SyncStep for EchoStep {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        if ctx.is_cancelled() {
            return Err(StepError::Failed("execution cancelled".to_string()));
        }
        Ok(ctx.parameters().clone())
    }
}
