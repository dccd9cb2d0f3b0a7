//! Event sinks for orchestration events.
//!
//! The engine never blocks on a sink: node lifecycle events go through
//! [`EventSink::try_emit`]. The graph projector is itself a sink, which is how
//! new node execution records invalidate cached graphs.

mod fanout;
mod sink;

pub use fanout::FanoutEventSink;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::OrchestrationEvent;

/// Sends a typed orchestration event to a sink without blocking.
pub fn emit_event(sink: &dyn EventSink, event: &OrchestrationEvent) {
    sink.try_emit(&event.event_type, Some(event.payload()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{event_names, Status};
    use uuid::Uuid;

    #[test]
    fn test_emit_event_forwards_payload() {
        let sink = CollectingEventSink::new();
        let id = Uuid::new_v4();
        emit_event(&sink, &OrchestrationEvent::plan_concluded(id, Status::Succeeded));

        let events = sink.events_of_type(event_names::PLAN_CONCLUDED);
        assert_eq!(events.len(), 1);
        let data = events[0].1.clone().unwrap();
        assert_eq!(data["plan_execution_id"], id.to_string());
        assert_eq!(data["status"], "SUCCEEDED");
    }
}
