//! The open creator registry.

use std::sync::Arc;

use super::creator::PartialPlanCreator;
use super::creators::{
    ExecutionPlanCreator, ParallelPlanCreator, PipelinePlanCreator, PipelineStagePlanCreator,
    ServicePlanCreator, StagePlanCreator, StagesPlanCreator, StepGroupPlanCreator,
    StepPlanCreator,
};
use super::definition::DefinitionField;

/// Creators matched against definition fields by their declared types.
///
/// Lookup is a linear scan from the most recently registered creator, so a
/// custom creator shadows a built-in one for the same field and type.
#[derive(Clone, Default)]
pub struct CreatorRegistry {
    creators: Vec<Arc<dyn PartialPlanCreator>>,
}

impl CreatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in creators.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PipelinePlanCreator));
        registry.register(Arc::new(StagesPlanCreator));
        registry.register(Arc::new(ParallelPlanCreator));
        registry.register(Arc::new(StagePlanCreator));
        registry.register(Arc::new(PipelineStagePlanCreator));
        registry.register(Arc::new(ServicePlanCreator));
        registry.register(Arc::new(ExecutionPlanCreator));
        registry.register(Arc::new(StepGroupPlanCreator));
        registry.register(Arc::new(StepPlanCreator::new()));
        registry
    }

    /// Adds a creator.
    pub fn register(&mut self, creator: Arc<dyn PartialPlanCreator>) {
        self.creators.push(creator);
    }

    /// Adds a creator, builder style.
    #[must_use]
    pub fn with_creator(mut self, creator: Arc<dyn PartialPlanCreator>) -> Self {
        self.register(creator);
        self
    }

    /// The creator for a field.
    #[must_use]
    pub fn find(&self, field: &DefinitionField) -> Option<Arc<dyn PartialPlanCreator>> {
        self.creators
            .iter()
            .rev()
            .find(|c| c.supports(field))
            .cloned()
    }

    /// Number of registered creators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

impl std::fmt::Debug for CreatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.creators.iter().map(|c| c.name().to_string()))
            .finish()
    }
}
