//! Interrupts: out-of-band control signals targeting an execution or node.
//!
//! Abort, AbortAll and Pause interrupts stay active until the execution
//! concludes (or, for Pause, resumes). While one is active, registering
//! the same type against the same target is a no-op.

mod model;

pub use model::{
    Interrupt, InterruptConfig, InterruptOutcome, InterruptRequest, InterruptState,
    InterruptType,
};
