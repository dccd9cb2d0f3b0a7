//! Built-in step executables.

mod approval;
mod delegate;
mod pipeline_stage;
mod sections;
mod simple;

pub use approval::{approval_callback_id, ApprovalStep};
pub use delegate::{DelegateTaskStep, SyncDelegateStep};
pub use pipeline_stage::{PipelineStageStep, CHILD_EXECUTION_ID};
pub use sections::{ForkStep, SectionChainStep, StrategyStep};
pub use simple::{EchoStep, ServiceConfigStep};
