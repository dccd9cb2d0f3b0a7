//! # Planflow
//!
//! The execution core of a pipeline orchestration platform.
//!
//! Planflow turns a declarative pipeline definition into a plan of executable
//! nodes and drives that plan to completion:
//!
//! - **Plan creation**: pluggable creators walk a parsed definition tree bottom-up
//!   and emit immutable [`plan::PlanNode`]s
//! - **Facilitation**: every node runs in one of four modes (sync, async callback,
//!   single child, multi child) and is routed onwards by its advisers
//! - **Interrupts**: abort, pause, resume and expire signals, including propagation
//!   into nested child pipeline executions
//! - **Remote dispatch**: sync-wait and register-and-resume submission toward a
//!   remote worker pool
//! - **Graph projection**: the append-only execution log is projected into a
//!   displayable DAG with a version-ordered cache
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use planflow::prelude::*;
//!
//! let engine = EngineBuilder::new()
//!     .with_store(Arc::new(InMemoryExecutionStore::new()))
//!     .with_transport(Arc::new(InMemoryWorkerTransport::new()))
//!     .build();
//!
//! let execution_id = engine
//!     .start_execution(&definition, serde_json::json!({}), ExecutionMetadata::manual("alice"))
//!     .await?;
//!
//! let graph = engine.generate_graph(execution_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod ambiance;
pub mod cancellation;
pub mod conditions;
pub mod config;
pub mod core;
pub mod creation;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod execution;
pub mod graph;
pub mod interrupts;
pub mod observability;
pub mod plan;
pub mod steps;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ambiance::{Ambiance, ExecutionMetadata, Level, StrategyMetadata};
    pub use crate::cancellation::CancellationToken;
    pub use crate::conditions::{Condition, Criteria, Operator, WhenCondition};
    pub use crate::config::EngineConfig;
    pub use crate::core::{ExecutionMode, Status, StepCategory, StepType};
    pub use crate::creation::{DefinitionField, DefinitionNode, PlanCreatorService};
    pub use crate::dispatch::{
        InMemoryWorkerTransport, TaskDispatcher, TaskMode, TaskResponse, TaskSpec,
        WorkerTransport,
    };
    pub use crate::engine::{EngineBuilder, OrchestrationEngine};
    pub use crate::errors::{
        DispatchError, EngineError, ErrorInfo, InterruptError, PlanCreationError, StepError,
        StoreError,
    };
    pub use crate::events::{EventSink, FanoutEventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::execution::{
        ExecutionStore, InMemoryExecutionStore, NodeExecution, PlanExecution,
    };
    pub use crate::graph::{EdgeList, GraphProjector, GraphVertex, OrchestrationGraph};
    pub use crate::interrupts::{
        Interrupt, InterruptConfig, InterruptOutcome, InterruptRequest, InterruptType,
    };
    pub use crate::plan::{AdviserObtainment, Plan, PlanNode};
    pub use crate::steps::{StepExecutable, StepRegistry};
    pub use crate::utils::{generate_uuid, iso_timestamp};
}
