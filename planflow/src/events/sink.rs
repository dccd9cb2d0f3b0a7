//! Event sink trait and implementations.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use crate::core::event_names;

/// Trait for sinks that receive orchestration events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "node_execution.created")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without blocking. Must never panic; failures are
    /// logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// A sink that discards all events. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that logs events through `tracing`.
///
/// Ignored interrupts and expired tasks are logged at `warn`; everything else
/// at the sink's level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or("-")
                .to_string()
        };
        let execution = field("plan_execution_id");
        let node = field("node_execution_id");
        let status = field("status");

        if event_type == event_names::INTERRUPT_IGNORED || event_type == event_names::TASK_EXPIRED {
            warn!(
                event_type,
                plan_execution_id = %execution,
                node_execution_id = %node,
                interrupt_id = %field("interruptId"),
                reason = %field("reason"),
                "Event: {event_type}"
            );
        } else if self.level == Level::DEBUG {
            debug!(
                event_type,
                plan_execution_id = %execution,
                node_execution_id = %node,
                %status,
                event_data = ?data,
                "Event: {event_type}"
            );
        } else {
            info!(
                event_type,
                plan_execution_id = %execution,
                node_execution_id = %node,
                %status,
                "Event: {event_type}"
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A sink that keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Payloads of the events of exactly `event_type`, in emission order.
    #[must_use]
    pub fn payloads(&self, event_type: &str) -> Vec<Value> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| data.clone())
            .collect()
    }

    /// Plan execution ids carried by the events of `event_type`.
    #[must_use]
    pub fn execution_ids(&self, event_type: &str) -> Vec<Uuid> {
        self.payloads(event_type)
            .iter()
            .filter_map(|d| d.get("plan_execution_id").and_then(Value::as_str))
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit("test", None).await;
        let sink = LoggingEventSink::debug();
        sink.emit(
            "node_execution.created",
            Some(serde_json::json!({"plan_execution_id": "abc"})),
        )
        .await;
        sink.try_emit("plan_execution.started", None);
        LoggingEventSink::default().try_emit(
            event_names::INTERRUPT_IGNORED,
            Some(serde_json::json!({"interruptId": "i-1", "reason": "execution concluded"})),
        );
    }

    #[test]
    fn test_collecting_sink_payloads() {
        let sink = CollectingEventSink::new();
        let id = Uuid::new_v4();
        sink.try_emit(
            event_names::PLAN_STARTED,
            Some(serde_json::json!({"plan_execution_id": id.to_string()})),
        );
        sink.try_emit(event_names::PLAN_STARTED, None);
        sink.try_emit(event_names::PLAN_CONCLUDED, Some(serde_json::json!({})));

        assert_eq!(sink.payloads(event_names::PLAN_STARTED).len(), 1);
        assert_eq!(sink.execution_ids(event_names::PLAN_STARTED), vec![id]);
        assert!(sink.execution_ids(event_names::PLAN_CONCLUDED).is_empty());
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        sink.emit("node_execution.created", None).await;
        sink.try_emit("node_execution.concluded", None);
        sink.emit("task.submitted", None).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("node_execution.").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
