//! Stage section and step group creators.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{advisers_for, chain_dependencies, timeout_of, when_of};
use crate::core::{ExecutionMode, StepCategory, StepType};
use crate::creation::creator::{type_set, CreationContext, Dependency, PartialPlanCreator, ANY_TYPE};
use crate::errors::PlanCreationError;
use crate::plan::{PlanNode, CHILD_NODE_ID};
use crate::steps::step_types::{EXECUTION_SECTION, SERVICE_CONFIG, STEP_GROUP};

/// Creates the service section. Its parameters are the resolved service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServicePlanCreator;

impl PartialPlanCreator for ServicePlanCreator {
    fn name(&self) -> &str {
        "service"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("service", &[ANY_TYPE])])
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        _children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let service = dependency
            .metadata
            .get("resolvedService")
            .cloned()
            .unwrap_or_else(|| dependency.field.node.value().clone());
        Ok(PlanNode::new(
            dependency.uuid.clone(),
            "service",
            StepType::new(SERVICE_CONFIG, StepCategory::Section),
            ExecutionMode::Sync,
        )
        .with_name("Service")
        .with_group("SERVICE")
        .with_parameters(service)
        .with_advisers(advisers_for(
            &dependency.field.node,
            dependency.next_node_id.as_deref(),
        )?))
    }
}

/// Creates the execution section: a chain of steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPlanCreator;

impl PartialPlanCreator for ExecutionPlanCreator {
    fn name(&self) -> &str {
        "execution"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("execution", &[ANY_TYPE])])
    }

    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        let steps = dependency.field.node.field("steps").ok_or_else(|| {
            PlanCreationError::invalid_field(dependency.field.node.path(), "execution has no steps")
        })?;
        chain_dependencies(&steps.node, &dependency.uuid)
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        Ok(PlanNode::new(
            dependency.uuid.clone(),
            "execution",
            StepType::new(EXECUTION_SECTION, StepCategory::Section),
            ExecutionMode::Child,
        )
        .with_name("Execution")
        .with_group("EXECUTION")
        .with_parameters(chain_head(dependency, children)?)
        .with_advisers(advisers_for(
            &dependency.field.node,
            dependency.next_node_id.as_deref(),
        )?))
    }
}

/// Creates a step group: a named chain of steps with its own failure
/// strategies and when-condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepGroupPlanCreator;

impl PartialPlanCreator for StepGroupPlanCreator {
    fn name(&self) -> &str {
        "step-group"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("stepGroup", &[ANY_TYPE])])
    }

    fn create_children(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        let steps = dependency.field.node.field("steps").ok_or_else(|| {
            PlanCreationError::invalid_field(dependency.field.node.path(), "step group has no steps")
        })?;
        chain_dependencies(&steps.node, &dependency.uuid)
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let node = &dependency.field.node;
        let identifier = node.require_identifier()?;
        let mut plan_node = PlanNode::new(
            dependency.uuid.clone(),
            identifier,
            StepType::new(STEP_GROUP, StepCategory::StepGroup),
            ExecutionMode::Child,
        )
        .with_name(node.name().unwrap_or(identifier))
        .with_group("STEP_GROUP")
        .with_parameters(chain_head(dependency, children)?)
        .with_advisers(advisers_for(node, dependency.next_node_id.as_deref())?);
        if let Some(timeout) = timeout_of(node)? {
            plan_node = plan_node.with_timeout_ms(timeout);
        }
        if let Some(when) = when_of(node)? {
            plan_node = plan_node.with_when(when);
        }
        Ok(plan_node)
    }
}

fn chain_head(dependency: &Dependency, children: &[Dependency]) -> Result<Value, PlanCreationError> {
    let first = children.first().ok_or_else(|| {
        PlanCreationError::invalid_field(dependency.field.node.path(), "no steps")
    })?;
    Ok(json!({ CHILD_NODE_ID: first.uuid }))
}
