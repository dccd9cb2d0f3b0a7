//! Execution state store: the only shared mutable state of the engine.
//!
//! Every component talks through the store (write, then notify). Node
//! executions are append-only: a status change records a new transition in
//! the history rather than overwriting it, and a retry appends a new node
//! execution while flagging the old attempt.

mod memory;
mod records;
mod store;

pub use memory::InMemoryExecutionStore;
pub use records::{
    CallbackResolution, ChildProgress, NodeExecution, NodePatch, PendingChild, PlanExecution,
    StatusTransition,
};
pub use store::{ExecutionStore, InterruptRegistration};
