//! The context handed to step executables.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::ambiance::Ambiance;
use crate::cancellation::CancellationToken;
use crate::dispatch::TaskDispatcher;
use crate::errors::{EngineError, StepError};
use crate::execution::ExecutionStore;
use crate::interrupts::{InterruptOutcome, InterruptRequest};
use crate::plan::PlanNode;

/// The slice of the engine a step may call back into.
#[async_trait]
pub trait OrchestrationHandle: Send + Sync {
    /// The execution store.
    fn store(&self) -> Arc<dyn ExecutionStore>;

    /// The remote task dispatcher.
    fn dispatcher(&self) -> Arc<TaskDispatcher>;

    /// Creates a nested execution of `definition` owned by the calling node.
    ///
    /// The nested execution is recorded immediately but only starts once the
    /// calling node has registered its callbacks.
    async fn create_child_execution(
        &self,
        ctx: &StepContext,
        definition: &Value,
        inputs: Value,
    ) -> Result<Uuid, EngineError>;

    /// Registers an interrupt against any execution.
    async fn register_interrupt(
        &self,
        request: InterruptRequest,
    ) -> Result<InterruptOutcome, EngineError>;
}

/// Everything a step needs to run one node execution.
#[derive(Clone)]
pub struct StepContext {
    ambiance: Ambiance,
    node_execution_id: Uuid,
    plan_node: PlanNode,
    inputs: Value,
    retry_index: u32,
    cancellation: Arc<CancellationToken>,
    handle: Arc<dyn OrchestrationHandle>,
}

impl StepContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        ambiance: Ambiance,
        node_execution_id: Uuid,
        plan_node: PlanNode,
        handle: Arc<dyn OrchestrationHandle>,
    ) -> Self {
        Self {
            ambiance,
            node_execution_id,
            plan_node,
            inputs: Value::Null,
            retry_index: 0,
            cancellation: Arc::new(CancellationToken::new()),
            handle,
        }
    }

    /// Sets the execution inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the retry attempt.
    #[must_use]
    pub fn with_retry_index(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }

    /// Shares the execution's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// The node's ambiance.
    #[must_use]
    pub fn ambiance(&self) -> &Ambiance {
        &self.ambiance
    }

    /// The owning plan execution.
    #[must_use]
    pub fn plan_execution_id(&self) -> Uuid {
        self.ambiance.plan_execution_id
    }

    /// The node execution being run.
    #[must_use]
    pub fn node_execution_id(&self) -> Uuid {
        self.node_execution_id
    }

    /// The plan node being run.
    #[must_use]
    pub fn plan_node(&self) -> &PlanNode {
        &self.plan_node
    }

    /// The node's step parameters.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.plan_node.step_parameters
    }

    /// Deserializes the step parameters.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.plan_node.step_parameters.clone())
            .map_err(|e| StepError::InvalidParameters(e.to_string()))
    }

    /// A string parameter.
    pub fn string_parameter(&self, key: &str) -> Result<&str, StepError> {
        self.plan_node
            .step_parameters
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::InvalidParameters(format!("missing string parameter '{key}'")))
    }

    /// The execution inputs.
    #[must_use]
    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    /// Zero for the first attempt.
    #[must_use]
    pub fn retry_index(&self) -> u32 {
        self.retry_index
    }

    /// Returns true once the execution was aborted. Long running sync work
    /// should poll this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// The engine handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn OrchestrationHandle> {
        &self.handle
    }

    /// Shortcut for the execution store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        self.handle.store()
    }

    /// Shortcut for the task dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<TaskDispatcher> {
        self.handle.dispatcher()
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("node_execution_id", &self.node_execution_id)
            .field("plan_node", &self.plan_node.uuid)
            .field("retry_index", &self.retry_index)
            .finish_non_exhaustive()
    }
}
