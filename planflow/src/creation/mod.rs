//! Plan creation.
//!
//! A parsed definition tree is turned into an immutable [`Plan`](crate::plan::Plan)
//! by an open registry of partial plan creators. Creation is bottom-up: a
//! composite creator first enumerates its child dependencies, the service
//! creates those, then the composite builds the node referencing them.

mod cache;
mod creator;
mod creators;
mod definition;
mod registry;
mod service;
pub mod strategy;

pub use cache::PlanCache;
pub use creator::{type_set, CreationContext, Dependency, PartialPlanCreator, ANY_TYPE};
pub use creators::{
    ExecutionPlanCreator, ParallelPlanCreator, PipelinePlanCreator, PipelineStagePlanCreator,
    ServicePlanCreator, StagePlanCreator, StagesPlanCreator, StepGroupPlanCreator,
    StepPlanCreator,
};
pub use definition::{DefinitionField, DefinitionNode, PIPELINE_FIELD};
pub use registry::CreatorRegistry;
pub use service::{definition_hash, PlanCreatorService};
