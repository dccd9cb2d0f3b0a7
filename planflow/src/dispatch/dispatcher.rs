//! The task dispatcher.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::task::{EnqueueAck, TaskMode, TaskResponse, TaskSpec};
use super::transport::WorkerTransport;
use crate::core::event_names;
use crate::errors::DispatchError;
use crate::events::{EventSink, NoOpEventSink};
use crate::utils::{format_iso8601, now_utc, Timestamp};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_ABORT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Submits tasks to the worker transport and tracks their deadlines.
pub struct TaskDispatcher {
    transport: Arc<dyn WorkerTransport>,
    timeouts: DashMap<String, Timestamp>,
    sink: Arc<dyn EventSink>,
    poll_interval: Duration,
    abort_ack_timeout: Duration,
    default_timeout_ms: Option<u64>,
}

impl TaskDispatcher {
    /// Creates a dispatcher over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            transport,
            timeouts: DashMap::new(),
            sink: Arc::new(NoOpEventSink),
            poll_interval: DEFAULT_POLL_INTERVAL,
            abort_ack_timeout: DEFAULT_ABORT_ACK_TIMEOUT,
            default_timeout_ms: None,
        }
    }

    /// Sets the event sink for task events.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets how often a sync submission polls for its response.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how long `cancel` waits for the remote acknowledgement.
    #[must_use]
    pub fn with_abort_ack_timeout(mut self, timeout: Duration) -> Self {
        self.abort_ack_timeout = timeout;
        self
    }

    /// Timeout requested for specs that carry none.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    /// Submits a task along the path its mode selects.
    ///
    /// Returns the task id and, for sync tasks, the response.
    pub async fn submit(
        &self,
        spec: TaskSpec,
        timeout: Option<Duration>,
    ) -> Result<(String, Option<TaskResponse>), DispatchError> {
        let spec = Self::with_timeout(spec, timeout);
        match spec.mode {
            TaskMode::Async => self
                .submit_async(spec)
                .await
                .map(|ack| (ack.task_id, None)),
            TaskMode::Sync => self
                .submit_sync(spec)
                .await
                .map(|response| (response.task_id.clone(), Some(response))),
        }
    }

    /// Enqueues an async task and registers its deadline.
    ///
    /// A spec whose mode is not ASYNC is rejected before the transport is
    /// called.
    pub async fn submit_async(&self, spec: TaskSpec) -> Result<EnqueueAck, DispatchError> {
        Self::check_mode(&spec, TaskMode::Async)?;
        let spec = self.apply_default_timeout(spec);
        let ack = self.transport.enqueue(&spec).await?;
        self.timeouts.insert(ack.task_id.clone(), ack.total_expiry);
        info!(
            task_id = %ack.task_id,
            task_type = %spec.task_type,
            expires_at = %format_iso8601(&ack.total_expiry),
            "Task submitted"
        );
        self.sink.try_emit(
            event_names::TASK_SUBMITTED,
            Some(json!({
                "task_id": ack.task_id,
                "task_type": spec.task_type,
                "mode": TaskMode::Async,
            })),
        );
        Ok(ack)
    }

    /// Enqueues a sync task and waits for its response until the
    /// server-provided expiry.
    pub async fn submit_sync(&self, spec: TaskSpec) -> Result<TaskResponse, DispatchError> {
        Self::check_mode(&spec, TaskMode::Sync)?;
        let spec = self.apply_default_timeout(spec);
        let ack = self.transport.enqueue(&spec).await?;
        debug!(task_id = %ack.task_id, "Sync task enqueued, waiting for response");

        loop {
            if let Some(response) = self.transport.fetch_response(&ack.task_id).await? {
                self.sink.try_emit(
                    event_names::TASK_COMPLETED,
                    Some(json!({ "task_id": ack.task_id, "status": response.status })),
                );
                return Ok(response);
            }
            let now = now_utc();
            if now >= ack.total_expiry {
                warn!(task_id = %ack.task_id, "Sync task expired");
                self.sink.try_emit(
                    event_names::TASK_EXPIRED,
                    Some(json!({ "task_id": ack.task_id })),
                );
                return Err(DispatchError::Timeout {
                    task_id: ack.task_id,
                    expired_at: format_iso8601(&ack.total_expiry),
                });
            }
            let remaining = (ack.total_expiry - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Best-effort cancellation of an in-flight task.
    ///
    /// The deadline registration is dropped whether or not the remote side
    /// acknowledges in time. Returns whether it acknowledged.
    pub async fn cancel(&self, task_id: &str) -> bool {
        self.timeouts.remove(task_id);
        match tokio::time::timeout(self.abort_ack_timeout, self.transport.abort(task_id)).await {
            Ok(Ok(acked)) => {
                debug!(task_id = %task_id, acked, "Task abort sent");
                acked
            }
            Ok(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Task abort failed");
                false
            }
            Err(_) => {
                warn!(task_id = %task_id, "Task abort not acknowledged in time");
                false
            }
        }
    }

    /// Drops the deadline of a completed task. Returns false for unknown ids.
    pub fn complete(&self, task_id: &str) -> bool {
        let known = self.timeouts.remove(task_id).is_some();
        if known {
            self.sink.try_emit(
                event_names::TASK_COMPLETED,
                Some(json!({ "task_id": task_id })),
            );
        }
        known
    }

    /// Removes and returns tasks whose deadline is at or before `now`.
    pub fn expired_tasks(&self, now: Timestamp) -> Vec<String> {
        let expired: Vec<String> = self
            .timeouts
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in &expired {
            self.timeouts.remove(task_id);
            self.sink
                .try_emit(event_names::TASK_EXPIRED, Some(json!({ "task_id": task_id })));
        }
        expired
    }

    /// Deadline of a tracked task.
    #[must_use]
    pub fn deadline(&self, task_id: &str) -> Option<Timestamp> {
        self.timeouts.get(task_id).map(|t| *t)
    }

    /// Number of tracked async tasks.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.timeouts.len()
    }

    fn check_mode(spec: &TaskSpec, expected: TaskMode) -> Result<(), DispatchError> {
        spec.validate()?;
        if spec.mode != expected {
            return Err(DispatchError::invalid_request(format!(
                "task mode {} is not supported by {} submission",
                spec.mode,
                match expected {
                    TaskMode::Sync => "synchronous",
                    TaskMode::Async => "asynchronous",
                }
            )));
        }
        Ok(())
    }

    fn apply_default_timeout(&self, mut spec: TaskSpec) -> TaskSpec {
        if spec.timeout_ms.is_none() {
            spec.timeout_ms = self.default_timeout_ms;
        }
        spec
    }

    fn with_timeout(mut spec: TaskSpec, timeout: Option<Duration>) -> TaskSpec {
        if let Some(timeout) = timeout {
            spec.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        }
        spec
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("tracked", &self.timeouts.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
