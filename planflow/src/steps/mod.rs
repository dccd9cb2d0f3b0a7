//! Step executables.
//!
//! Every plan node is driven by the executable registered for its step
//! type. An executable is one of four variants, matching the node's
//! facilitator mode:
//!
//! - [`SyncStep`]: runs inline to completion
//! - [`AsyncStep`]: starts work, returns callback ids, resumes on the callbacks
//! - [`ChildStep`]: names one child plan node and concludes from its chain
//! - [`ChildrenStep`]: names several children and aggregates them

mod builtin;
mod context;
mod executable;
mod registry;
pub mod step_types;

pub use builtin::{
    approval_callback_id, ApprovalStep, DelegateTaskStep, EchoStep, ForkStep,
    PipelineStageStep, SectionChainStep, ServiceConfigStep, StrategyStep, SyncDelegateStep,
    CHILD_EXECUTION_ID,
};
pub use context::{OrchestrationHandle, StepContext};
pub use executable::{
    aggregate_children, AsyncStart, AsyncStep, ChildStep, ChildrenSpec, ChildrenStep,
    StepExecutable, SyncStep,
};
pub use registry::StepRegistry;
