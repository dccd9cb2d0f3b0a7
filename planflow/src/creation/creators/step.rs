//! Leaf step creator.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::{advisers_for, timeout_of, when_of};
use crate::core::{ExecutionMode, StepCategory, StepType};
use crate::creation::creator::{CreationContext, Dependency, PartialPlanCreator};
use crate::errors::PlanCreationError;
use crate::plan::PlanNode;
use crate::steps::step_types::leaf_step_modes;

/// Creates leaf steps for the step types in its table.
///
/// The table maps a step `type` tag to the facilitator mode its plan node
/// declares. The engine checks that mode against the step registry when an
/// execution starts.
#[derive(Debug, Clone)]
pub struct StepPlanCreator {
    modes: BTreeMap<String, ExecutionMode>,
}

impl Default for StepPlanCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl StepPlanCreator {
    /// A creator for the built-in step types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modes: leaf_step_modes()
                .into_iter()
                .map(|(name, mode)| (name.to_string(), mode))
                .collect(),
        }
    }

    /// Adds a step type.
    #[must_use]
    pub fn with_step_type(mut self, type_name: impl Into<String>, mode: ExecutionMode) -> Self {
        self.modes.insert(type_name.into(), mode);
        self
    }
}

impl PartialPlanCreator for StepPlanCreator {
    fn name(&self) -> &str {
        "step"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        BTreeMap::from([("step".to_string(), self.modes.keys().cloned().collect())])
    }

    fn create_parent(
        &self,
        _ctx: &mut CreationContext,
        dependency: &Dependency,
        _children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let node = &dependency.field.node;
        let identifier = node.require_identifier()?;
        let type_name = node.node_type().unwrap_or_default();
        let mode = self
            .modes
            .get(type_name)
            .copied()
            .ok_or_else(|| PlanCreationError::NoCreator {
                field: dependency.field.name.clone(),
                node_type: type_name.to_string(),
            })?;

        let mut plan_node = PlanNode::new(
            dependency.uuid.clone(),
            identifier,
            StepType::new(type_name, StepCategory::Step),
            mode,
        )
        .with_name(node.name().unwrap_or(identifier))
        .with_group("STEP")
        .with_parameters(node.get("spec").cloned().unwrap_or(Value::Null))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creation::{DefinitionField, DefinitionNode};
    use serde_json::json;

    #[test]
    fn test_step_node() {
        let field = DefinitionField::new(
            "step",
            DefinitionNode::new(
                json!({
                    "identifier": "deploy",
                    "name": "Deploy",
                    "type": "ShellScript",
                    "timeout": "10m",
                    "spec": {"script": "echo hi"}
                }),
                "steps/0/step",
            ),
        );
        let creator = StepPlanCreator::new();
        assert!(creator.supports(&field));

        let dep = Dependency::new(field).with_next(Some("b".into()));
        let node = creator
            .create_parent(&mut CreationContext::new(), &dep, &[])
            .unwrap();
        assert_eq!(node.identifier, "deploy");
        assert_eq!(node.name, "Deploy");
        assert_eq!(node.facilitator, ExecutionMode::Async);
        assert_eq!(node.timeout_ms, Some(600_000));
        assert_eq!(node.step_parameters["script"], "echo hi");
        assert_eq!(node.next_node_id(), Some("b"));
    }

    #[test]
    fn test_custom_step_type() {
        let creator = StepPlanCreator::new().with_step_type("Wait", ExecutionMode::Async);
        assert!(creator.supported_types()["step"].contains("Wait"));
    }
}
