//! The parsed definition tree read by plan creators.

use serde_json::Value;

use crate::errors::PlanCreationError;
use crate::utils::stable_uuid;

/// Root field of every pipeline definition.
pub const PIPELINE_FIELD: &str = "pipeline";

/// One node of a parsed definition, addressed by its path from the root.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionNode {
    value: Value,
    path: String,
}

impl DefinitionNode {
    /// Wraps a value found at `path`.
    #[must_use]
    pub fn new(value: Value, path: impl Into<String>) -> Self {
        Self {
            value,
            path: path.into(),
        }
    }

    /// The raw value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Slash separated path from the root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The `identifier` property.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.value.get("identifier").and_then(Value::as_str)
    }

    /// The `identifier` property, or an invalid-field error.
    pub fn require_identifier(&self) -> Result<&str, PlanCreationError> {
        self.identifier()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PlanCreationError::invalid_field(&self.path, "missing identifier"))
    }

    /// The `name` property, falling back to the identifier.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.value
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| self.identifier())
    }

    /// The `type` tag.
    #[must_use]
    pub fn node_type(&self) -> Option<&str> {
        self.value.get("type").and_then(Value::as_str)
    }

    /// A raw property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// A named child field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<DefinitionField> {
        self.value.get(name).map(|value| {
            DefinitionField::new(
                name,
                DefinitionNode::new(value.clone(), format!("{}/{name}", self.path)),
            )
        })
    }

    /// Elements of an array node; empty for anything else.
    #[must_use]
    pub fn array_elements(&self) -> Vec<DefinitionNode> {
        self.value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| DefinitionNode::new(v.clone(), format!("{}/{i}", self.path)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The only field of a wrapper object such as `{"step": {...}}`.
    pub fn single_field(&self) -> Result<DefinitionField, PlanCreationError> {
        let object = self
            .value
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| {
                PlanCreationError::invalid_field(&self.path, "expected an object with one field")
            })?;
        let name = object
            .keys()
            .next()
            .ok_or_else(|| PlanCreationError::invalid_field(&self.path, "empty element"))?;
        self.field(name)
            .ok_or_else(|| PlanCreationError::invalid_field(&self.path, "empty element"))
    }

    /// Plan node id for this position. The same definition always yields
    /// the same ids.
    #[must_use]
    pub fn uuid(&self) -> String {
        stable_uuid(&self.path).to_string()
    }
}

/// A field name plus the node it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionField {
    /// Field name, e.g. "stage" or "step".
    pub name: String,
    /// The field's value.
    pub node: DefinitionNode,
}

impl DefinitionField {
    /// Creates a field.
    #[must_use]
    pub fn new(name: impl Into<String>, node: DefinitionNode) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }

    /// The `pipeline` field of a whole definition.
    pub fn root(definition: &Value) -> Result<Self, PlanCreationError> {
        let pipeline = definition.get(PIPELINE_FIELD).ok_or_else(|| {
            PlanCreationError::invalid_field("", "definition has no pipeline field")
        })?;
        if !pipeline.is_object() {
            return Err(PlanCreationError::invalid_field(
                PIPELINE_FIELD,
                "pipeline must be an object",
            ));
        }
        Ok(Self::new(
            PIPELINE_FIELD,
            DefinitionNode::new(pipeline.clone(), PIPELINE_FIELD),
        ))
    }

    /// The node's type tag.
    #[must_use]
    pub fn node_type(&self) -> Option<&str> {
        self.node.node_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_paths() {
        let root = DefinitionField::root(&json!({
            "pipeline": {"identifier": "p", "stages": [{"stage": {"identifier": "s1", "type": "Custom"}}]}
        }))
        .unwrap();
        assert_eq!(root.node.path(), "pipeline");
        assert_eq!(root.node.identifier(), Some("p"));

        let stages = root.node.field("stages").unwrap();
        let elements = stages.node.array_elements();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].path(), "pipeline/stages/0");

        let stage = elements[0].single_field().unwrap();
        assert_eq!(stage.name, "stage");
        assert_eq!(stage.node_type(), Some("Custom"));
        assert_eq!(stage.node.path(), "pipeline/stages/0/stage");
    }

    #[test]
    fn test_uuid_is_stable() {
        let a = DefinitionNode::new(json!({}), "pipeline/stages/0/stage");
        let b = DefinitionNode::new(json!({"other": 1}), "pipeline/stages/0/stage");
        assert_eq!(a.uuid(), b.uuid());
        assert_ne!(a.uuid(), DefinitionNode::new(json!({}), "pipeline").uuid());
    }

    #[test]
    fn test_name_falls_back_to_identifier() {
        let node = DefinitionNode::new(json!({"identifier": "build"}), "x");
        assert_eq!(node.name(), Some("build"));
        assert!(DefinitionNode::new(json!({}), "x").require_identifier().is_err());
    }

    #[test]
    fn test_root_requires_pipeline() {
        assert!(DefinitionField::root(&json!({"stage": {}})).is_err());
        assert!(DefinitionField::root(&json!({"pipeline": []})).is_err());
    }

    #[test]
    fn test_single_field_rejects_ambiguous_elements() {
        let node = DefinitionNode::new(json!({"step": {}, "stage": {}}), "x");
        assert!(node.single_field().is_err());
    }
}
