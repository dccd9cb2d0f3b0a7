//! In-process worker transport.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::task::{EnqueueAck, TaskResponse, TaskSpec};
use super::transport::WorkerTransport;
use crate::errors::DispatchError;
use crate::utils::{deadline_after, now_utc, Timestamp};

const DEFAULT_TIMEOUT_MS: u64 = 600_000;

type AutoResponder = Arc<dyn Fn(&TaskSpec) -> Option<Value> + Send + Sync>;

/// A worker transport that keeps tasks in memory.
///
/// Responses are supplied by [`respond`](Self::respond) or by an
/// auto-responder invoked at enqueue time.
#[derive(Default)]
pub struct InMemoryWorkerTransport {
    tasks: DashMap<String, TaskSpec>,
    responses: DashMap<String, TaskResponse>,
    aborted: Mutex<Vec<String>>,
    counter: AtomicU64,
    auto_responder: Option<AutoResponder>,
    abort_delay: Option<Duration>,
}

impl InMemoryWorkerTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every enqueued task whose responder returns `Some`.
    #[must_use]
    pub fn with_auto_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&TaskSpec) -> Option<Value> + Send + Sync + 'static,
    {
        self.auto_responder = Some(Arc::new(responder));
        self
    }

    /// Delays abort acknowledgements.
    #[must_use]
    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = Some(delay);
        self
    }

    /// Records a response for a task.
    pub fn respond(&self, response: TaskResponse) {
        self.responses.insert(response.task_id.clone(), response);
    }

    /// Task ids without a response, ordered by enqueue.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<String> {
        let mut pending: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| !self.responses.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        pending.sort_by_key(|id| task_number(id));
        pending
    }

    /// The spec behind a task id.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<TaskSpec> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Ids passed to `abort`, in call order.
    #[must_use]
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().clone()
    }

    /// Number of enqueued tasks.
    #[must_use]
    pub fn enqueued_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

fn task_number(task_id: &str) -> u64 {
    task_id
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

#[async_trait]
impl WorkerTransport for InMemoryWorkerTransport {
    async fn enqueue(&self, spec: &TaskSpec) -> Result<EnqueueAck, DispatchError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = format!("task-{n}");
        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let total_expiry = deadline_after(now_utc(), timeout).unwrap_or(Timestamp::MAX_UTC);

        self.tasks.insert(task_id.clone(), spec.clone());
        if let Some(payload) = self.auto_responder.as_ref().and_then(|r| r(spec)) {
            self.respond(TaskResponse::success(task_id.clone(), payload));
        }
        Ok(EnqueueAck {
            task_id,
            total_expiry,
        })
    }

    async fn fetch_response(&self, task_id: &str) -> Result<Option<TaskResponse>, DispatchError> {
        if !self.tasks.contains_key(task_id) {
            return Err(DispatchError::Transport(format!("unknown task {task_id}")));
        }
        Ok(self.responses.get(task_id).map(|r| r.clone()))
    }

    async fn abort(&self, task_id: &str) -> Result<bool, DispatchError> {
        self.aborted.lock().push(task_id.to_string());
        if let Some(delay) = self.abort_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.tasks.contains_key(task_id))
    }
}

impl std::fmt::Debug for InMemoryWorkerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWorkerTransport")
            .field("tasks", &self.tasks.len())
            .field("responses", &self.responses.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskMode;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_respond() {
        let transport = InMemoryWorkerTransport::new();
        let ack = transport
            .enqueue(&TaskSpec::new("SHELL", TaskMode::Async, json!({})))
            .await
            .unwrap();
        assert_eq!(transport.pending_tasks(), vec![ack.task_id.clone()]);
        assert!(transport.fetch_response(&ack.task_id).await.unwrap().is_none());

        transport.respond(TaskResponse::success(ack.task_id.clone(), json!({"ok": true})));
        let response = transport.fetch_response(&ack.task_id).await.unwrap().unwrap();
        assert!(response.is_success());
        assert!(transport.pending_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_transport_error() {
        let transport = InMemoryWorkerTransport::new();
        assert!(matches!(
            transport.fetch_response("nope").await,
            Err(DispatchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_records_calls() {
        let transport = InMemoryWorkerTransport::new();
        let ack = transport
            .enqueue(&TaskSpec::new("SHELL", TaskMode::Async, json!({})))
            .await
            .unwrap();
        assert!(transport.abort(&ack.task_id).await.unwrap());
        assert!(!transport.abort("task-99").await.unwrap());
        assert_eq!(transport.aborted(), vec![ack.task_id, "task-99".to_string()]);
    }
}
