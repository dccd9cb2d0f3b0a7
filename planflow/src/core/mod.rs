//! Core domain types shared by every planflow component.
//!
//! - Node and plan execution status, with transition and aggregation rules
//! - Facilitation modes and step categories
//! - Orchestration events emitted to event sinks

mod event;
mod status;

pub use event::{event_names, OrchestrationEvent};
pub use status::{ExecutionMode, SkipType, Status, StepCategory, StepType};
