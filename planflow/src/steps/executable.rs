//! The four step executable shapes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::context::StepContext;
use crate::core::{ExecutionMode, Status};
use crate::errors::StepError;
use crate::execution::{NodeExecution, PendingChild};
use crate::interrupts::Interrupt;
use crate::utils::Timestamp;

/// A step that runs inline and returns its outcome.
#[async_trait]
pub trait SyncStep: Send + Sync {
    /// Runs the step.
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError>;
}

/// What an async step waits for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AsyncStart {
    /// The node resumes once every id has been notified.
    pub callback_ids: Vec<String>,
    /// Step-provided deadline. The node's own timeout applies too; the
    /// earlier of the two wins.
    pub expires_at: Option<Timestamp>,
}

impl AsyncStart {
    /// Waits on a single callback id.
    #[must_use]
    pub fn single(callback_id: impl Into<String>) -> Self {
        Self {
            callback_ids: vec![callback_id.into()],
            expires_at: None,
        }
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// A step that starts work and resumes on callbacks.
#[async_trait]
pub trait AsyncStep: Send + Sync {
    /// Starts the work and names the callbacks to wait on.
    async fn start(&self, ctx: &StepContext) -> Result<AsyncStart, StepError>;

    /// Concludes the step once all callbacks are in, keyed by callback id.
    async fn handle_response(
        &self,
        ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<Value, StepError>;

    /// Stops outstanding work. Called with every callback id the node ever
    /// registered, oldest first.
    async fn handle_abort(
        &self,
        _ctx: &StepContext,
        _callback_ids: &[String],
        _interrupt: &Interrupt,
    ) -> Result<(), StepError> {
        Ok(())
    }
}

/// A step that runs exactly one child node.
#[async_trait]
pub trait ChildStep: Send + Sync {
    /// The plan node id of the child.
    async fn obtain_child(&self, ctx: &StepContext) -> Result<String, StepError>;

    /// Computes the step status once the child chain has ended.
    async fn handle_child_response(
        &self,
        _ctx: &StepContext,
        children: &[NodeExecution],
    ) -> Result<Status, StepError> {
        Ok(aggregate_children(children))
    }
}

/// The children a multi-child step fans out to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChildrenSpec {
    /// Children in launch order.
    pub children: Vec<PendingChild>,
    /// At most this many run at once. `None` defers to the engine default.
    pub max_concurrency: Option<usize>,
}

impl ChildrenSpec {
    /// Children without a concurrency cap of their own.
    #[must_use]
    pub fn new(children: Vec<PendingChild>) -> Self {
        Self {
            children,
            max_concurrency: None,
        }
    }

    /// Caps concurrency.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max;
        self
    }
}

/// A step that runs several children.
#[async_trait]
pub trait ChildrenStep: Send + Sync {
    /// The children to launch.
    async fn obtain_children(&self, ctx: &StepContext) -> Result<ChildrenSpec, StepError>;

    /// Computes the step status once every child chain has ended.
    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        children: &[NodeExecution],
    ) -> Result<Status, StepError> {
        Ok(aggregate_children(children))
    }
}

/// Aggregates the effective status of the current attempts among `children`.
///
/// Superseded retry attempts are ignored, and an ignored failure counts as a
/// success.
#[must_use]
pub fn aggregate_children(children: &[NodeExecution]) -> Status {
    Status::aggregate(
        children
            .iter()
            .filter(|c| !c.old_retry)
            .map(NodeExecution::effective_status),
    )
}

/// A registered step executable.
#[derive(Clone)]
pub enum StepExecutable {
    /// Runs inline.
    Sync(Arc<dyn SyncStep>),
    /// Resumes on callbacks.
    Async(Arc<dyn AsyncStep>),
    /// Runs one child.
    Child(Arc<dyn ChildStep>),
    /// Runs several children.
    Children(Arc<dyn ChildrenStep>),
}

impl StepExecutable {
    /// The facilitator mode this executable serves.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
            Self::Child(_) => ExecutionMode::Child,
            Self::Children(_) => ExecutionMode::Children,
        }
    }

    /// Wraps a sync step.
    pub fn sync(step: impl SyncStep + 'static) -> Self {
        Self::Sync(Arc::new(step))
    }

    /// Wraps an async step.
    pub fn asynchronous(step: impl AsyncStep + 'static) -> Self {
        Self::Async(Arc::new(step))
    }

    /// Wraps a child step.
    pub fn child(step: impl ChildStep + 'static) -> Self {
        Self::Child(Arc::new(step))
    }

    /// Wraps a children step.
    pub fn children(step: impl ChildrenStep + 'static) -> Self {
        Self::Children(Arc::new(step))
    }
}

impl std::fmt::Debug for StepExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StepExecutable").field(&self.mode()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::{Ambiance, ExecutionMetadata};
    use crate::core::{StepCategory, StepType};
    use crate::plan::PlanNode;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn child(status: Status) -> NodeExecution {
        let node = PlanNode::new(
            "n",
            "n",
            StepType::new("Echo", StepCategory::Step),
            ExecutionMode::Sync,
        );
        let ambiance = Ambiance::new(
            Uuid::new_v4(),
            "p",
            BTreeMap::new(),
            ExecutionMetadata::manual("t"),
        );
        let mut record = NodeExecution::queued(Uuid::new_v4(), &node, ambiance);
        record.status = status;
        record
    }

    #[test]
    fn test_aggregate_skips_old_retries() {
        let mut old = child(Status::Failed);
        old.old_retry = true;
        let children = vec![old, child(Status::Succeeded)];
        assert_eq!(aggregate_children(&children), Status::Succeeded);
    }

    #[test]
    fn test_aggregate_counts_ignored_failure_as_success() {
        let mut ignored = child(Status::Failed);
        ignored.failure_ignored = true;
        assert_eq!(
            aggregate_children(&[ignored, child(Status::Succeeded)]),
            Status::Succeeded
        );
        assert_eq!(
            aggregate_children(&[child(Status::Errored), child(Status::Succeeded)]),
            Status::Errored
        );
    }

    #[test]
    fn test_mode() {
        struct Noop;
        #[async_trait]
        impl SyncStep for Noop {
            async fn execute(&self, _ctx: &StepContext) -> Result<Value, StepError> {
                Ok(Value::Null)
            }
        }
        assert_eq!(StepExecutable::sync(Noop).mode(), ExecutionMode::Sync);
    }
}
