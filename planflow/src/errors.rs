//! Error types for the planflow engine.
//!
//! Errors are grouped by the boundary at which they surface:
//! - build-time ([`PlanCreationError`]) rejects a plan before any node runs
//! - dispatch-time ([`DispatchError`]) rejects a task at submission
//! - run-time ([`StepError`]) is captured as a terminal node status
//! - interrupt-time ([`InterruptError`]) concerns the interrupt target itself

use crate::core::{ExecutionMode, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Plan construction failed.
    #[error("{0}")]
    PlanCreation(#[from] PlanCreationError),

    /// A task could not be dispatched.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// A step failed outside of node facilitation.
    #[error("{0}")]
    Step(#[from] StepError),

    /// An interrupt could not be registered.
    #[error("{0}")]
    Interrupt(#[from] InterruptError),

    /// The execution store rejected an operation.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The policy gate refused to start the plan.
    #[error("Execution denied by policy: {reason}")]
    PolicyDenied {
        /// Why the gate refused.
        reason: String,
    },

    /// No plan execution exists with the given id.
    #[error("Plan execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// No node execution exists with the given id.
    #[error("Node execution not found: {0}")]
    NodeNotFound(Uuid),

    /// Stored state contradicts itself.
    #[error("Corrupt execution state: {0}")]
    CorruptState(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a build-time error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "PLAN-001-UNRESOLVED_REFERENCE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Build-time errors raised while turning a definition tree into a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanCreationError {
    /// A field references a sibling or stage that does not exist.
    #[error("Unresolved reference at '{path}': {message}")]
    UnresolvedReference {
        /// Definition path of the referencing field.
        path: String,
        /// The unresolved reference.
        reference: String,
        /// Human readable description.
        message: String,
    },

    /// A child pipeline stage was found inside an already nested pipeline.
    #[error("Nested chaining not supported: pipeline stage '{stage}' cannot run a pipeline that itself contains pipeline stages")]
    NestedChaining {
        /// Identifier of the offending pipeline stage.
        stage: String,
    },

    /// No registered creator supports the field.
    #[error("No plan creator found for field '{field}' with type '{node_type}'")]
    NoCreator {
        /// Field name.
        field: String,
        /// Type tag of the field ("" when untyped).
        node_type: String,
    },

    /// A plan node references a node missing from the plan.
    #[error("Plan node '{node_id}' references unknown node '{reference}'")]
    DanglingReference {
        /// The referencing node.
        node_id: String,
        /// The missing node id.
        reference: String,
    },

    /// A field is missing or malformed.
    #[error("Invalid field at '{path}': {message}")]
    InvalidField {
        /// Definition path of the field.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// The facilitator mode of a plan node does not match its step.
    #[error("Step type '{step_type}' of node '{node_id}' runs as {actual}, but the plan declares {expected}")]
    InvalidMode {
        /// The plan node id.
        node_id: String,
        /// The step type.
        step_type: String,
        /// Mode declared on the plan node.
        expected: ExecutionMode,
        /// Mode of the registered step ("UNREGISTERED" when missing).
        actual: String,
    },
}

impl PlanCreationError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid_field(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedReference { .. } => "PLAN-001-UNRESOLVED_REFERENCE",
            Self::NestedChaining { .. } => "PLAN-002-NESTED_CHAINING",
            Self::NoCreator { .. } => "PLAN-003-NO_CREATOR",
            Self::DanglingReference { .. } => "PLAN-004-DANGLING_REFERENCE",
            Self::InvalidField { .. } => "PLAN-005-INVALID_FIELD",
            Self::InvalidMode { .. } => "PLAN-006-INVALID_MODE",
        }
    }

    /// Builds the diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        let code = self.code();
        let mut info = ErrorInfo::new(code, self.to_string());
        if let Some(hint) = ErrorSuggestions::get(code) {
            info = info.with_fix_hint(hint);
        }
        match self {
            Self::UnresolvedReference { path, reference, .. } => info
                .with_context_entry("path", path)
                .with_context_entry("reference", reference),
            Self::NestedChaining { stage } => info.with_context_entry("stage", stage),
            Self::NoCreator { field, node_type } => info
                .with_context_entry("field", field)
                .with_context_entry("type", node_type),
            Self::DanglingReference { node_id, reference } => info
                .with_context_entry("node_id", node_id)
                .with_context_entry("reference", reference),
            Self::InvalidField { path, .. } => info.with_context_entry("path", path),
            Self::InvalidMode { node_id, step_type, .. } => info
                .with_context_entry("node_id", node_id)
                .with_context_entry("step_type", step_type),
        }
    }
}

/// Errors raised synchronously by the task dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The request was rejected before reaching the transport.
    #[error("Invalid task request: {message}")]
    InvalidRequest {
        /// Why the request is invalid.
        message: String,
    },

    /// The transport failed.
    #[error("Worker transport error: {0}")]
    Transport(String),

    /// No response arrived before the server-provided expiry.
    #[error("Task {task_id} expired at {expired_at}")]
    Timeout {
        /// The task id.
        task_id: String,
        /// The expiry timestamp (RFC 3339).
        expired_at: String,
    },
}

impl DispatchError {
    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

/// Run-time step errors. These never escape node facilitation; the engine
/// records them as a FAILED or ERRORED node status.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The step's work failed.
    #[error("Step failed: {0}")]
    Failed(String),

    /// The step parameters could not be read.
    #[error("Invalid step parameters: {0}")]
    InvalidParameters(String),

    /// An expression or condition could not be evaluated.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Dispatching remote work failed.
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    /// A nested execution could not be started.
    #[error("Child execution error: {0}")]
    ChildExecution(String),

    /// A stored value the step depends on is missing.
    #[error("Missing state: {0}")]
    MissingState(String),
}

impl StepError {
    /// The terminal status this error maps to.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Failed(_) | Self::Dispatch(DispatchError::Transport(_)) => Status::Failed,
            Self::Dispatch(DispatchError::Timeout { .. }) => Status::Expired,
            _ => Status::Errored,
        }
    }
}

/// Errors raised while registering or applying an interrupt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterruptError {
    /// The target execution does not exist.
    #[error("Interrupt target execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The target node does not exist or belongs to another execution.
    #[error("Interrupt target node {node_execution_id} not found in execution {plan_execution_id}")]
    NodeNotFound {
        /// The execution id.
        plan_execution_id: Uuid,
        /// The node execution id.
        node_execution_id: Uuid,
    },

    /// The interrupt type needs a node target.
    #[error("Interrupt {0} requires a target node")]
    MissingNodeTarget(String),
}

/// Errors raised by the execution store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A record was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind.
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// A record with the same id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// The requested status transition is not allowed.
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Record id.
        id: String,
        /// Current status.
        from: Status,
        /// Requested status.
        to: Status,
    },
}

impl StoreError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true when the error is a rejected transition out of a terminal status.
    #[must_use]
    pub fn is_terminal_conflict(&self) -> bool {
        matches!(self, Self::InvalidTransition { from, .. } if from.is_terminal())
    }
}

/// Provides default suggestions for build-time error codes.
pub struct ErrorSuggestions;

impl ErrorSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "PLAN-001-UNRESOLVED_REFERENCE" => Some(
                "Check that the referenced stage exists and is declared before the stage \
                 that propagates from it.",
            ),
            "PLAN-002-NESTED_CHAINING" => Some(
                "A child pipeline may not contain pipeline stages. Flatten the chain into \
                 a single level of nesting.",
            ),
            "PLAN-003-NO_CREATOR" => Some(
                "The field type is not registered. Register a plan creator for it or fix \
                 the type tag.",
            ),
            "PLAN-004-DANGLING_REFERENCE" => Some(
                "A creator emitted a reference to a node it never created.",
            ),
            "PLAN-006-INVALID_MODE" => Some(
                "Register a step whose facilitation mode matches the plan node.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_plan_creation_error_info() {
        let err = PlanCreationError::UnresolvedReference {
            path: "pipeline/stages/[1]/stage".to_string(),
            reference: "deploy".to_string(),
            message: "stage 'deploy' does not exist".to_string(),
        };

        let info = err.error_info();
        assert_eq!(info.code, "PLAN-001-UNRESOLVED_REFERENCE");
        assert!(info.fix_hint.is_some());
        assert_eq!(info.context.get("reference"), Some(&"deploy".to_string()));
    }

    #[test]
    fn test_nested_chaining_message() {
        let err = PlanCreationError::NestedChaining {
            stage: "child".to_string(),
        };
        assert!(err.to_string().contains("Nested chaining not supported"));
        assert_eq!(err.code(), "PLAN-002-NESTED_CHAINING");
    }

    #[test]
    fn test_step_error_status() {
        assert_eq!(StepError::Failed("x".into()).status(), Status::Failed);
        assert_eq!(StepError::Evaluation("x".into()).status(), Status::Errored);
        let timeout = StepError::Dispatch(DispatchError::Timeout {
            task_id: "t".into(),
            expired_at: "now".into(),
        });
        assert_eq!(timeout.status(), Status::Expired);
    }

    #[test]
    fn test_terminal_conflict() {
        let err = StoreError::InvalidTransition {
            id: "n".into(),
            from: Status::Succeeded,
            to: Status::Aborted,
        };
        assert!(err.is_terminal_conflict());
    }

    #[test]
    fn test_suggestions() {
        assert!(ErrorSuggestions::get("PLAN-002-NESTED_CHAINING").is_some());
        assert!(ErrorSuggestions::get("UNKNOWN").is_none());
    }
}
