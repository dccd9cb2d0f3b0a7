//! Plans: the immutable set of plan nodes built for one execution request.

mod adviser;
mod node;

pub use adviser::{AdviserObtainment, ExhaustedAction};
pub use node::{PlanNode, CHILD_NODE_ID, PARALLEL_NODE_IDS};

use crate::errors::PlanCreationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full set of plan nodes for one pipeline version plus its start node.
///
/// Plans are never mutated after creation and may be shared across
/// executions of the same definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id.
    pub plan_id: String,
    /// Nodes keyed by their uuid.
    pub nodes: BTreeMap<String, PlanNode>,
    /// Root node id.
    pub start_node_id: String,
    /// SHA-256 of the definition the plan was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_hash: Option<String>,
}

impl Plan {
    /// Creates a plan from its nodes.
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        start_node_id: impl Into<String>,
        nodes: impl IntoIterator<Item = PlanNode>,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            start_node_id: start_node_id.into(),
            nodes: nodes.into_iter().map(|n| (n.uuid.clone(), n)).collect(),
            definition_hash: None,
        }
    }

    /// Sets the definition hash.
    #[must_use]
    pub fn with_definition_hash(mut self, hash: impl Into<String>) -> Self {
        self.definition_hash = Some(hash.into());
        self
    }

    /// Looks up a node by uuid.
    #[must_use]
    pub fn fetch_node(&self, uuid: &str) -> Option<&PlanNode> {
        self.nodes.get(uuid)
    }

    /// Returns the root node.
    #[must_use]
    pub fn start_node(&self) -> Option<&PlanNode> {
        self.fetch_node(&self.start_node_id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the plan has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finds the first node with the given identifier.
    #[must_use]
    pub fn find_by_identifier(&self, identifier: &str) -> Option<&PlanNode> {
        self.nodes.values().find(|n| n.identifier == identifier)
    }

    /// Checks referential integrity.
    ///
    /// The start node must exist, and every parent, child reference and
    /// adviser target must name a node of this plan.
    pub fn validate(&self) -> Result<(), PlanCreationError> {
        if !self.nodes.contains_key(&self.start_node_id) {
            return Err(PlanCreationError::DanglingReference {
                node_id: "<plan>".to_string(),
                reference: self.start_node_id.clone(),
            });
        }

        for node in self.nodes.values() {
            let references = node
                .parent_id
                .iter()
                .cloned()
                .chain(node.child_references())
                .chain(
                    node.adviser_obtainments
                        .iter()
                        .filter_map(|a| a.target().map(str::to_string)),
                );
            for reference in references {
                if !self.nodes.contains_key(&reference) {
                    return Err(PlanCreationError::DanglingReference {
                        node_id: node.uuid.clone(),
                        reference,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionMode, StepCategory, StepType};
    use serde_json::json;

    fn echo(id: &str) -> PlanNode {
        PlanNode::new(
            id,
            id,
            StepType::new("Echo", StepCategory::Step),
            ExecutionMode::Sync,
        )
    }

    #[test]
    fn test_validate_ok() {
        let root = PlanNode::new(
            "root",
            "root",
            StepType::new("NG_FORK", StepCategory::Fork),
            ExecutionMode::Children,
        )
        .with_parameters(json!({ PARALLEL_NODE_IDS: ["a"] }));
        let a = echo("a")
            .with_parent("root")
            .with_adviser(AdviserObtainment::NextStep {
                next_node_id: "b".into(),
            });
        let b = echo("b").with_parent("root");

        let plan = Plan::new("p", "root", [root, a, b]);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.start_node().unwrap().uuid, "root");
    }

    #[test]
    fn test_validate_dangling_parent() {
        let plan = Plan::new("p", "a", [echo("a").with_parent("ghost")]);
        let err = plan.validate().unwrap_err();
        assert_eq!(err.code(), "PLAN-004-DANGLING_REFERENCE");
    }

    #[test]
    fn test_validate_missing_start() {
        let plan = Plan::new("p", "missing", [echo("a")]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_dangling_adviser() {
        let plan = Plan::new(
            "p",
            "a",
            [echo("a").with_adviser(AdviserObtainment::OnFail {
                next_node_id: Some("rollback".into()),
            })],
        );
        assert!(matches!(
            plan.validate(),
            Err(PlanCreationError::DanglingReference { reference, .. }) if reference == "rollback"
        ));
    }
}
