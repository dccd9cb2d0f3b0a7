//! Broadcasts events to several sinks.

use super::EventSink;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// An event sink that forwards every event to each of its children in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    /// Creates an empty fan-out sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Adds a child sink in place.
    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of child sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true when there are no child sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[async_trait]
impl EventSink for FanoutEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        for sink in &self.sinks {
            sink.emit(event_type, data.clone()).await;
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        for sink in &self.sinks {
            sink.try_emit(event_type, data.clone());
        }
    }
}
