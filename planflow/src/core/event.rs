//! Orchestration events emitted to event sinks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::Status;

/// Event type names emitted by the engine.
pub mod event_names {
    /// A node execution record was appended.
    pub const NODE_CREATED: &str = "node_execution.created";
    /// A node execution changed status.
    pub const NODE_STATUS_UPDATED: &str = "node_execution.status_updated";
    /// A node execution reached a terminal status and was advised.
    pub const NODE_CONCLUDED: &str = "node_execution.concluded";
    /// A plan execution started.
    pub const PLAN_STARTED: &str = "plan_execution.started";
    /// A plan execution was paused or resumed.
    pub const PLAN_STATUS_UPDATED: &str = "plan_execution.status_updated";
    /// A plan execution reached a terminal status.
    pub const PLAN_CONCLUDED: &str = "plan_execution.concluded";
    /// An interrupt was registered.
    pub const INTERRUPT_REGISTERED: &str = "interrupt.registered";
    /// An interrupt was applied.
    pub const INTERRUPT_HANDLED: &str = "interrupt.handled";
    /// An interrupt was ignored (duplicate or terminal target).
    pub const INTERRUPT_IGNORED: &str = "interrupt.ignored";
    /// A task was submitted to the worker transport.
    pub const TASK_SUBMITTED: &str = "task.submitted";
    /// A task response was correlated.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// A task passed its expiry.
    pub const TASK_EXPIRED: &str = "task.expired";
}

/// An event emitted during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// The event type (see [`event_names`]).
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl OrchestrationEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the plan execution id carried by the event, if any.
    #[must_use]
    pub fn plan_execution_id(&self) -> Option<Uuid> {
        self.data
            .get("plan_execution_id")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Converts the event payload into the JSON object passed to sinks.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        serde_json::Value::Object(map)
    }

    /// Creates a "node_execution.created" event.
    #[must_use]
    pub fn node_created(plan_execution_id: Uuid, node_execution_id: Uuid, identifier: &str) -> Self {
        Self::new(event_names::NODE_CREATED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("node_execution_id", serde_json::json!(node_execution_id))
            .add_data("identifier", serde_json::json!(identifier))
    }

    /// Creates a "node_execution.status_updated" event.
    #[must_use]
    pub fn node_status_updated(
        plan_execution_id: Uuid,
        node_execution_id: Uuid,
        from: Status,
        to: Status,
    ) -> Self {
        Self::new(event_names::NODE_STATUS_UPDATED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("node_execution_id", serde_json::json!(node_execution_id))
            .add_data("from", serde_json::json!(from))
            .add_data("status", serde_json::json!(to))
    }

    /// Creates a "node_execution.concluded" event.
    #[must_use]
    pub fn node_concluded(plan_execution_id: Uuid, node_execution_id: Uuid, status: Status) -> Self {
        Self::new(event_names::NODE_CONCLUDED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("node_execution_id", serde_json::json!(node_execution_id))
            .add_data("status", serde_json::json!(status))
    }

    /// Creates a "plan_execution.started" event.
    #[must_use]
    pub fn plan_started(plan_execution_id: Uuid, plan_id: &str) -> Self {
        Self::new(event_names::PLAN_STARTED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("plan_id", serde_json::json!(plan_id))
    }

    /// Creates a "plan_execution.status_updated" event.
    #[must_use]
    pub fn plan_status_updated(plan_execution_id: Uuid, status: Status) -> Self {
        Self::new(event_names::PLAN_STATUS_UPDATED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("status", serde_json::json!(status))
    }

    /// Creates a "plan_execution.concluded" event.
    #[must_use]
    pub fn plan_concluded(plan_execution_id: Uuid, status: Status) -> Self {
        Self::new(event_names::PLAN_CONCLUDED)
            .add_data("plan_execution_id", serde_json::json!(plan_execution_id))
            .add_data("status", serde_json::json!(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = OrchestrationEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_plan_execution_id_roundtrip() {
        let id = Uuid::new_v4();
        let event = OrchestrationEvent::plan_started(id, "plan");
        assert_eq!(event.plan_execution_id(), Some(id));
        assert_eq!(event.event_type, event_names::PLAN_STARTED);
    }

    #[test]
    fn test_status_updated_payload() {
        let event = OrchestrationEvent::node_status_updated(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Status::Queued,
            Status::Running,
        );
        let payload = event.payload();
        assert_eq!(payload["status"], "RUNNING");
        assert_eq!(payload["from"], "QUEUED");
        assert!(payload.get("timestamp").is_some());
    }
}
