//! Pipeline root and stages section creators.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::chain_dependencies;
use crate::core::{ExecutionMode, StepCategory, StepType};
use crate::creation::creator::{type_set, CreationContext, Dependency, PartialPlanCreator, ANY_TYPE};
use crate::errors::PlanCreationError;
use crate::plan::{PlanNode, CHILD_NODE_ID};
use crate::steps::step_types::{PIPELINE_SECTION, STAGES_SECTION};

fn first_child(
    dependency: &Dependency,
    children: &[Dependency],
) -> Result<String, PlanCreationError> {
    children
        .first()
        .map(|c| c.uuid.clone())
        .ok_or_else(|| PlanCreationError::invalid_field(dependency.field.node.path(), "no children"))
}

/// Creates the pipeline root; its only child is the stages section.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelinePlanCreator;

impl PartialPlanCreator for PipelinePlanCreator {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("pipeline", &[ANY_TYPE])])
    }

    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        let stages = dependency.field.node.field("stages").ok_or_else(|| {
            PlanCreationError::invalid_field(dependency.field.node.path(), "pipeline has no stages")
        })?;
        Ok(vec![Dependency::new(stages).with_parent(dependency.uuid.clone())])
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let node = &dependency.field.node;
        let identifier = node.require_identifier()?;
        Ok(PlanNode::new(
            dependency.uuid.clone(),
            identifier,
            StepType::new(PIPELINE_SECTION, StepCategory::Pipeline),
            ExecutionMode::Child,
        )
        .with_name(node.name().unwrap_or(identifier))
        .with_group("PIPELINE")
        .with_parameters(json!({ CHILD_NODE_ID: first_child(dependency, children)? })))
    }
}

/// Creates the stages section, which runs its stages as a chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagesPlanCreator;

impl PartialPlanCreator for StagesPlanCreator {
    fn name(&self) -> &str {
        "stages"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("stages", &[ANY_TYPE])])
    }

    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        chain_dependencies(&dependency.field.node, &dependency.uuid)
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        Ok(PlanNode::new(
            dependency.uuid.clone(),
            "stages",
            StepType::new(STAGES_SECTION, StepCategory::Stages),
            ExecutionMode::Child,
        )
        .with_name("Stages")
        .with_group("STAGES")
        .with_parameters(json!({ CHILD_NODE_ID: first_child(dependency, children)? })))
    }
}
