//! Testing utilities for planflow engines and steps.
//!
//! This module provides:
//! - Mock step executables
//! - Definition builders and an engine harness
//! - Assertions over node execution records

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_terminal, assert_node_status, assert_status_path, latest_attempt,
};
pub use fixtures::{
    parallel, pipeline, stage, step, step_context, with_failure_strategy, EngineHarness,
    StaticHandle,
};
pub use mocks::{BlockingSyncStep, ManualAsyncStep, RecordingSyncStep};
