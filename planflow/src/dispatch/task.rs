//! Task specifications and responses exchanged with the worker transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::DispatchError;
use crate::utils::Timestamp;

/// How the caller waits for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMode {
    /// Block until the response arrives.
    Sync,
    /// Return after the enqueue; the response arrives out of band.
    Async,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "SYNC"),
            Self::Async => write!(f, "ASYNC"),
        }
    }
}

/// A unit of work for a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Worker-side task type (e.g. "SHELL_SCRIPT").
    pub task_type: String,
    /// Wait mode.
    pub mode: TaskMode,
    /// Task parameters, opaque to the dispatcher.
    #[serde(default)]
    pub parameters: Value,
    /// Requested execution timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Worker selectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    /// Account the task runs for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl TaskSpec {
    /// Creates a task spec.
    #[must_use]
    pub fn new(task_type: impl Into<String>, mode: TaskMode, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            mode,
            parameters,
            timeout_ms: None,
            selectors: Vec::new(),
            account_id: None,
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Adds a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }

    /// Sets the account.
    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Rejects malformed specs.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.task_type.trim().is_empty() {
            return Err(DispatchError::invalid_request("task type must not be empty"));
        }
        if self.timeout_ms == Some(0) {
            return Err(DispatchError::invalid_request("task timeout must be positive"));
        }
        Ok(())
    }
}

/// Enqueue acknowledgement from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueAck {
    /// Transport-assigned task id.
    pub task_id: String,
    /// Server-computed deadline covering queueing and execution.
    pub total_expiry: Timestamp,
}

/// Outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResponseStatus {
    /// The work succeeded.
    Success,
    /// The work failed.
    Failure,
    /// The worker could not run the work.
    Error,
}

/// A worker's response to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// The task id.
    pub task_id: String,
    /// Outcome.
    pub status: TaskResponseStatus,
    /// Response payload.
    #[serde(default)]
    pub payload: Value,
    /// Error message for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskResponse {
    /// A successful response.
    #[must_use]
    pub fn success(task_id: impl Into<String>, payload: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResponseStatus::Success,
            payload,
            error_message: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResponseStatus::Failure,
            payload: Value::Null,
            error_message: Some(message.into()),
        }
    }

    /// Returns true for a successful response.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate() {
        assert!(TaskSpec::new("SHELL", TaskMode::Async, json!({})).validate().is_ok());
        assert!(TaskSpec::new(" ", TaskMode::Async, json!({})).validate().is_err());
        assert!(TaskSpec::new("SHELL", TaskMode::Sync, json!({}))
            .with_timeout_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_response_roundtrip_fields() {
        let response = TaskResponse::failure("t1", "exit 1");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "FAILURE");
        assert!(!response.is_success());
    }
}
