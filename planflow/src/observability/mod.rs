//! Observability utilities: subscriber setup, span attributes and timers.

mod subscriber;
mod tracing;

pub use self::tracing::{ExecutionSpanAttributes, NodeSpanAttributes, SpanTimer};
pub use subscriber::{init_tracing, LogFormat};
