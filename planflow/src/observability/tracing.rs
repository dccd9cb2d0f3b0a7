//! OpenTelemetry-style span attributes for executions and nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::core::{ExecutionMode, Status};

/// Span attributes for a plan execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSpanAttributes {
    /// Plan execution id.
    pub plan_execution_id: Option<Uuid>,
    /// Plan id.
    pub plan_id: Option<String>,
    /// Account id.
    pub account_id: Option<String>,
    /// Who triggered the run.
    pub triggered_by: Option<String>,
    /// Final status.
    pub status: Option<Status>,
}

impl ExecutionSpanAttributes {
    /// Creates attributes for an execution.
    #[must_use]
    pub fn new(plan_execution_id: Uuid) -> Self {
        Self {
            plan_execution_id: Some(plan_execution_id),
            ..Default::default()
        }
    }

    /// Sets the plan id.
    #[must_use]
    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Sets the triggering user.
    #[must_use]
    pub fn with_triggered_by(mut self, user: impl Into<String>) -> Self {
        self.triggered_by = Some(user.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Converts to OpenTelemetry attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        if let Some(v) = self.plan_execution_id {
            attrs.insert("plan.execution_id".to_string(), v.to_string());
        }
        if let Some(ref v) = self.plan_id {
            attrs.insert("plan.id".to_string(), v.clone());
        }
        if let Some(ref v) = self.account_id {
            attrs.insert("plan.account_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.triggered_by {
            attrs.insert("plan.triggered_by".to_string(), v.clone());
        }
        if let Some(v) = self.status {
            attrs.insert("plan.status".to_string(), v.to_string());
        }
        attrs
    }
}

/// Span attributes for a node execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpanAttributes {
    /// Node identifier.
    pub identifier: String,
    /// Step type name.
    pub step_type: Option<String>,
    /// Facilitation mode.
    pub mode: Option<ExecutionMode>,
    /// Status.
    pub status: Option<Status>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Failure message.
    pub error: Option<String>,
}

impl NodeSpanAttributes {
    /// Creates attributes for a node.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Sets the step type.
    #[must_use]
    pub fn with_step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    /// Sets the mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Converts to OpenTelemetry attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("node.identifier".to_string(), self.identifier.clone());
        if let Some(ref v) = self.step_type {
            attrs.insert("node.step_type".to_string(), v.clone());
        }
        if let Some(v) = self.mode {
            attrs.insert("node.mode".to_string(), v.to_string());
        }
        if let Some(v) = self.status {
            attrs.insert("node.status".to_string(), v.to_string());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("node.duration_ms".to_string(), v.to_string());
        }
        if let Some(ref v) = self.error {
            attrs.insert("node.error".to_string(), v.clone());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_attributes() {
        let attrs = NodeSpanAttributes::new("shell")
            .with_step_type("ShellScript")
            .with_mode(ExecutionMode::Async)
            .with_status(Status::Succeeded)
            .to_otel_attributes();
        assert_eq!(attrs.get("node.status"), Some(&"SUCCEEDED".to_string()));
        assert_eq!(attrs.get("node.mode"), Some(&"ASYNC".to_string()));
    }

    #[test]
    fn test_execution_attributes() {
        let id = Uuid::new_v4();
        let attrs = ExecutionSpanAttributes::new(id)
            .with_plan_id("plan")
            .with_status(Status::Aborted)
            .to_otel_attributes();
        assert_eq!(attrs.get("plan.execution_id"), Some(&id.to_string()));
        assert_eq!(attrs.get("plan.status"), Some(&"ABORTED".to_string()));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("facilitate");
        assert_eq!(timer.name(), "facilitate");
        assert!(timer.finish() >= 0.0);
    }
}
