//! Parallel block creator.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::advisers_for;
use crate::core::{ExecutionMode, StepCategory, StepType};
use crate::creation::creator::{type_set, CreationContext, Dependency, PartialPlanCreator, ANY_TYPE};
use crate::creation::definition::DefinitionNode;
use crate::errors::PlanCreationError;
use crate::plan::{PlanNode, PARALLEL_NODE_IDS};
use crate::steps::step_types::FORK;

/// Creates a fork node whose elements run concurrently.
///
/// The fork takes the chain position of the block: its successor is
/// routed from the fork, never from the branches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelPlanCreator;

impl PartialPlanCreator for ParallelPlanCreator {
    fn name(&self) -> &str {
        "parallel"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("parallel", &[ANY_TYPE])])
    }

    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        let elements = dependency.field.node.array_elements();
        if elements.is_empty() {
            return Err(PlanCreationError::invalid_field(
                dependency.field.node.path(),
                "parallel block is empty",
            ));
        }
        elements
            .iter()
            .map(|element| {
                element
                    .single_field()
                    .map(|field| Dependency::new(field).with_parent(dependency.uuid.clone()))
            })
            .collect()
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let ids: Vec<&str> = children.iter().map(|c| c.uuid.as_str()).collect();
        let advisers = advisers_for(
            &DefinitionNode::new(serde_json::Value::Null, dependency.field.node.path()),
            dependency.next_node_id.as_deref(),
        )?;
        Ok(PlanNode::new(
            dependency.uuid.clone(),
            "parallel",
            StepType::new(FORK, StepCategory::Fork),
            ExecutionMode::Children,
        )
        .with_name("parallel")
        .with_parameters(json!({ PARALLEL_NODE_IDS: ids }))
        .with_advisers(advisers))
    }
}
