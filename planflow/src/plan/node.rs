//! The plan node model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AdviserObtainment;
use crate::conditions::WhenCondition;
use crate::core::{ExecutionMode, SkipType, StepCategory, StepType};

/// Step parameter key naming the single child of a CHILD node.
pub const CHILD_NODE_ID: &str = "childNodeId";
/// Step parameter key listing the children of a CHILDREN node.
pub const PARALLEL_NODE_IDS: &str = "parallelNodeIds";

/// Immutable description of one executable unit plus its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Plan-unique id.
    pub uuid: String,
    /// Human identifier.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Step type.
    pub step_type: StepType,
    /// Group qualifier copied into the ambiance level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Serialized step parameters, opaque to the engine.
    #[serde(default)]
    pub step_parameters: Value,
    /// Facilitation mode.
    pub facilitator: ExecutionMode,
    /// Routing rules evaluated on terminal status, in order.
    #[serde(default)]
    pub adviser_obtainments: Vec<AdviserObtainment>,
    /// Async deadline, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Skip the node when this condition is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_condition: Option<WhenCondition>,
    /// Left out of fully qualified names.
    #[serde(default)]
    pub skip_expression_chain: bool,
    /// How the node renders in the graph when it is skipped.
    #[serde(default)]
    pub skip_graph_type: SkipType,
    /// The enclosing plan node, `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl PlanNode {
    /// Creates a plan node with no advisers and empty parameters.
    #[must_use]
    pub fn new(
        uuid: impl Into<String>,
        identifier: impl Into<String>,
        step_type: StepType,
        facilitator: ExecutionMode,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            step_type,
            group: None,
            step_parameters: Value::Null,
            facilitator,
            adviser_obtainments: Vec::new(),
            timeout_ms: None,
            when_condition: None,
            skip_expression_chain: false,
            skip_graph_type: SkipType::NoOp,
            parent_id: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the group qualifier.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the step parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.step_parameters = parameters;
        self
    }

    /// Appends an adviser obtainment.
    #[must_use]
    pub fn with_adviser(mut self, adviser: AdviserObtainment) -> Self {
        self.adviser_obtainments.push(adviser);
        self
    }

    /// Replaces the adviser obtainments.
    #[must_use]
    pub fn with_advisers(mut self, advisers: Vec<AdviserObtainment>) -> Self {
        self.adviser_obtainments = advisers;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the when-condition.
    #[must_use]
    pub fn with_when(mut self, when: WhenCondition) -> Self {
        self.when_condition = Some(when);
        self
    }

    /// Sets the skip-expression-chain flag.
    #[must_use]
    pub fn with_skip_expression_chain(mut self, skip: bool) -> Self {
        self.skip_expression_chain = skip;
        self
    }

    /// Sets the graph skip type.
    #[must_use]
    pub fn with_skip_graph_type(mut self, skip_type: SkipType) -> Self {
        self.skip_graph_type = skip_type;
        self
    }

    /// Sets the parent plan node.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Returns the step category.
    #[must_use]
    pub fn category(&self) -> StepCategory {
        self.step_type.category
    }

    /// Plan node ids this node starts as children, read from its parameters.
    #[must_use]
    pub fn child_references(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(id) = self.step_parameters.get(CHILD_NODE_ID).and_then(Value::as_str) {
            ids.push(id.to_string());
        }
        if let Some(list) = self
            .step_parameters
            .get(PARALLEL_NODE_IDS)
            .and_then(Value::as_array)
        {
            ids.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        ids
    }

    /// Next node of the chain, from the first next-step adviser.
    #[must_use]
    pub fn next_node_id(&self) -> Option<&str> {
        self.adviser_obtainments.iter().find_map(|a| match a {
            AdviserObtainment::NextStep { next_node_id } => Some(next_node_id.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_references() {
        let node = PlanNode::new(
            "fork",
            "parallel",
            StepType::new("NG_FORK", StepCategory::Fork),
            ExecutionMode::Children,
        )
        .with_parameters(json!({ PARALLEL_NODE_IDS: ["a", "b"] }));
        assert_eq!(node.child_references(), vec!["a", "b"]);

        let section = PlanNode::new(
            "exec",
            "execution",
            StepType::new("NG_EXECUTION", StepCategory::Section),
            ExecutionMode::Child,
        )
        .with_parameters(json!({ CHILD_NODE_ID: "steps" }));
        assert_eq!(section.child_references(), vec!["steps"]);
    }

    #[test]
    fn test_next_node_id() {
        let node = PlanNode::new(
            "a",
            "a",
            StepType::new("Echo", StepCategory::Step),
            ExecutionMode::Sync,
        )
        .with_adviser(AdviserObtainment::OnFail { next_node_id: None })
        .with_adviser(AdviserObtainment::NextStep {
            next_node_id: "b".into(),
        });
        assert_eq!(node.next_node_id(), Some("b"));
        assert_eq!(node.name, "a");
    }
}
