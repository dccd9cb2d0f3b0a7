//! The plan creator service.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::cache::PlanCache;
use super::creator::{CreationContext, Dependency};
use super::definition::DefinitionField;
use super::registry::CreatorRegistry;
use super::strategy::{strategy_of, wrap};
use crate::errors::PlanCreationError;
use crate::plan::Plan;

const PLAN_ID_HASH_LEN: usize = 12;

/// SHA-256 hex digest of a definition's canonical JSON text.
#[must_use]
pub fn definition_hash(definition: &Value) -> String {
    hex::encode(Sha256::digest(definition.to_string().as_bytes()))
}

/// Builds plans by walking a definition tree through the creator registry.
#[derive(Debug, Clone)]
pub struct PlanCreatorService {
    registry: CreatorRegistry,
    cache: Option<Arc<PlanCache>>,
}

impl Default for PlanCreatorService {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCreatorService {
    /// A service using the built-in creators and no cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: CreatorRegistry::with_defaults(),
            cache: None,
        }
    }

    /// Replaces the creator registry.
    #[must_use]
    pub fn with_registry(mut self, registry: CreatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Reuses plans built from identical definitions.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The creator registry.
    #[must_use]
    pub fn registry(&self) -> &CreatorRegistry {
        &self.registry
    }

    /// Builds the plan for a top-level pipeline definition.
    pub fn create_plan(&self, definition: &Value) -> Result<Arc<Plan>, PlanCreationError> {
        self.build(definition, CreationContext::new(), "")
    }

    /// Builds the plan for a pipeline started by a pipeline stage.
    ///
    /// Pipeline stages are rejected inside such a plan.
    pub fn create_child_plan(&self, definition: &Value) -> Result<Arc<Plan>, PlanCreationError> {
        self.build(definition, CreationContext::for_child_pipeline(), "child:")
    }

    fn build(
        &self,
        definition: &Value,
        mut ctx: CreationContext,
        cache_prefix: &str,
    ) -> Result<Arc<Plan>, PlanCreationError> {
        let hash = definition_hash(definition);
        let cache_key = format!("{cache_prefix}{hash}");
        if let Some(plan) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
            debug!(plan_id = %plan.plan_id, "Reusing cached plan");
            return Ok(plan);
        }

        let root = Dependency::new(DefinitionField::root(definition)?);
        let identifier = root.field.node.require_identifier()?.to_string();
        let start_node_id = root.uuid.clone();
        self.create(&mut ctx, root)?;

        let plan = Plan::new(
            format!("{identifier}-{}", &hash[..PLAN_ID_HASH_LEN]),
            start_node_id,
            ctx.into_nodes().into_values(),
        )
        .with_definition_hash(hash);
        plan.validate()?;
        info!(plan_id = %plan.plan_id, nodes = plan.len(), "Plan created");

        let plan = Arc::new(plan);
        Ok(match &self.cache {
            Some(cache) => cache.insert(cache_key, plan),
            None => plan,
        })
    }

    fn create(
        &self,
        ctx: &mut CreationContext,
        dependency: Dependency,
    ) -> Result<(), PlanCreationError> {
        if let Some(strategy) = strategy_of(&dependency.field).cloned() {
            let (strategy_node, wrapped) = wrap(&dependency, &strategy)?;
            ctx.add_node(strategy_node)?;
            return self.create(ctx, wrapped);
        }

        let creator = self
            .registry
            .find(&dependency.field)
            .ok_or_else(|| PlanCreationError::NoCreator {
                field: dependency.field.name.clone(),
                node_type: dependency.field.node_type().unwrap_or_default().to_string(),
            })?;

        let children = creator.create_children(ctx, &dependency)?;
        for child in &children {
            self.create(ctx, child.clone())?;
        }

        let mut node = creator.create_parent(ctx, &dependency, &children)?;
        node.parent_id.clone_from(&dependency.parent_id);
        debug!(
            creator = creator.name(),
            node_id = %node.uuid,
            identifier = %node.identifier,
            "Plan node created"
        );
        ctx.add_node(node)
    }
}
