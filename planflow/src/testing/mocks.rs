//! Mock step executables.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::errors::StepError;
use crate::interrupts::Interrupt;
use crate::steps::{AsyncStart, AsyncStep, StepContext, SyncStep};

/// A sync step that records calls and can fail its first attempts.
#[derive(Debug)]
pub struct RecordingSyncStep {
    outcome: Value,
    failures_left: Mutex<usize>,
    calls: Mutex<Vec<String>>,
}

impl RecordingSyncStep {
    /// Creates a step that always succeeds with `outcome`.
    #[must_use]
    pub fn new(outcome: Value) -> Self {
        Self {
            outcome,
            failures_left: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the first `times` calls.
    #[must_use]
    pub fn failing(self, times: usize) -> Self {
        *self.failures_left.lock() = times;
        self
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(self) -> Self {
        self.failing(usize::MAX)
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Identifiers of the nodes the step ran for, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SyncStep for RecordingSyncStep {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        self.calls.lock().push(ctx.plan_node().identifier.clone());
        let mut failures = self.failures_left.lock();
        if *failures > 0 {
            *failures = failures.saturating_sub(1);
            return Err(StepError::Failed(format!(
                "attempt {} failed",
                ctx.retry_index()
            )));
        }
        Ok(self.outcome.clone())
    }
}

/// A sync step that holds until released or until its execution is
/// cancelled. Tracks how many calls run at once.
#[derive(Debug)]
pub struct BlockingSyncStep {
    gate: Semaphore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    entered: AtomicUsize,
}

impl BlockingSyncStep {
    /// Creates a step with no permits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            entered: AtomicUsize::new(0),
        }
    }

    /// Lets `calls` blocked or future calls through.
    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    /// Calls currently blocked.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The most calls that were blocked at the same time.
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Calls started so far.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Polls until `count` calls are blocked, giving up after `timeout`.
    pub async fn wait_for_active(&self, count: usize, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        true
    }
}

impl Default for BlockingSyncStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStep for BlockingSyncStep {
    async fn execute(&self, ctx: &StepContext) -> Result<Value, StepError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let result = tokio::select! {
            permit = self.gate.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(Value::Null)
                }
                Err(_) => Err(StepError::Failed("gate closed".to_string())),
            },
            () = ctx.cancellation().cancelled() => {
                let reason = ctx.cancellation().cause().map(|c| c.reason).unwrap_or_default();
                Err(StepError::Failed(format!("cancelled while blocked: {reason}")))
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// An async step resolved by hand through its callback ids.
///
/// The callback id of a node is `manual-<node execution id>`. A response
/// carrying `"fail": true` fails the node.
#[derive(Debug, Default)]
pub struct ManualAsyncStep {
    started: Mutex<Vec<Uuid>>,
    aborted: Mutex<Vec<Uuid>>,
}

impl ManualAsyncStep {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The callback id of a node execution.
    #[must_use]
    pub fn callback_for(node_execution_id: Uuid) -> String {
        format!("manual-{node_execution_id}")
    }

    /// Node executions started so far.
    #[must_use]
    pub fn started(&self) -> Vec<Uuid> {
        self.started.lock().clone()
    }

    /// Node executions aborted so far.
    #[must_use]
    pub fn aborted(&self) -> Vec<Uuid> {
        self.aborted.lock().clone()
    }
}

#[async_trait]
impl AsyncStep for ManualAsyncStep {
    async fn start(&self, ctx: &StepContext) -> Result<AsyncStart, StepError> {
        self.started.lock().push(ctx.node_execution_id());
        Ok(AsyncStart::single(Self::callback_for(ctx.node_execution_id())))
    }

    async fn handle_response(
        &self,
        _ctx: &StepContext,
        responses: &BTreeMap<String, Value>,
    ) -> Result<Value, StepError> {
        let response = responses.values().next().cloned().unwrap_or(Value::Null);
        if response.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(StepError::Failed("manual failure".to_string()));
        }
        Ok(response)
    }

    async fn handle_abort(
        &self,
        ctx: &StepContext,
        _callback_ids: &[String],
        _interrupt: &Interrupt,
    ) -> Result<(), StepError> {
        self.aborted.lock().push(ctx.node_execution_id());
        Ok(())
    }
}
