//! The worker transport seam.

use async_trait::async_trait;

use super::task::{EnqueueAck, TaskResponse, TaskSpec};
use crate::errors::DispatchError;

/// Request/response channel toward the remote worker pool.
///
/// The wire format is opaque; only the task id and mode matter here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Enqueues a task and returns its id plus the server-side deadline.
    async fn enqueue(&self, spec: &TaskSpec) -> Result<EnqueueAck, DispatchError>;

    /// Returns the task's response if it has arrived.
    async fn fetch_response(&self, task_id: &str) -> Result<Option<TaskResponse>, DispatchError>;

    /// Asks the remote side to stop a task. Returns whether it acknowledged.
    async fn abort(&self, task_id: &str) -> Result<bool, DispatchError>;
}
