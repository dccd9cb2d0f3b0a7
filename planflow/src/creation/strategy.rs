//! Strategy (looping) wrappers.
//!
//! A node carrying a `strategy` block is split in two. The strategy node
//! takes the wrapped node's id, identifier, when-condition and advisers, so
//! everything routing to the original id still resolves. The wrapped node
//! is created under the id `<id>_strategy_child` and runs once per
//! iteration.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::creator::Dependency;
use super::creators::{advisers_for, when_of};
use super::definition::{DefinitionField, DefinitionNode};
use crate::ambiance::StrategyMetadata;
use crate::core::{ExecutionMode, StepCategory, StepType};
use crate::errors::PlanCreationError;
use crate::plan::{PlanNode, CHILD_NODE_ID};
use crate::steps::step_types::STRATEGY;

/// Suffix of the wrapped node's id.
pub const STRATEGY_CHILD_SUFFIX: &str = "_strategy_child";
/// Strategy node parameter holding the raw strategy block.
pub const STRATEGY_CONFIG: &str = "strategy";
/// Strategy node parameter holding the concurrency cap.
pub const MAX_CONCURRENCY: &str = "maxConcurrency";

const WRAPPER_KEYS: [&str; 3] = ["strategy", "failureStrategies", "when"];

/// Returns the strategy block of a field, if any.
#[must_use]
pub fn strategy_of(field: &DefinitionField) -> Option<&Value> {
    field.node.get("strategy").filter(|v| !v.is_null())
}

/// Splits `dependency` into the strategy node and the rewritten dependency
/// of the wrapped node.
pub fn wrap(dependency: &Dependency, strategy: &Value) -> Result<(PlanNode, Dependency), PlanCreationError> {
    let node = &dependency.field.node;
    let identifier = node.require_identifier()?;
    let path = format!("{}/strategy", node.path());
    expand(strategy).map_err(|message| PlanCreationError::invalid_field(&path, message))?;

    let child_uuid = format!("{}{STRATEGY_CHILD_SUFFIX}", dependency.uuid);
    let mut parameters = json!({
        CHILD_NODE_ID: child_uuid,
        STRATEGY_CONFIG: strategy,
    });
    if let Some(max) = max_concurrency(strategy) {
        parameters[MAX_CONCURRENCY] = json!(max);
    }

    let mut strategy_node = PlanNode::new(
        dependency.uuid.clone(),
        identifier,
        StepType::new(STRATEGY, StepCategory::Strategy),
        ExecutionMode::Children,
    )
    .with_name(node.name().unwrap_or(identifier))
    .with_group("STRATEGY")
    .with_skip_expression_chain(true)
    .with_parameters(parameters)
    .with_advisers(advisers_for(node, dependency.next_node_id.as_deref())?);
    if let Some(parent) = &dependency.parent_id {
        strategy_node = strategy_node.with_parent(parent.clone());
    }
    if let Some(when) = when_of(node)? {
        strategy_node = strategy_node.with_when(when);
    }

    let mut stripped = node.value().as_object().cloned().unwrap_or_else(Map::new);
    for key in WRAPPER_KEYS {
        stripped.remove(key);
    }
    let mut wrapped = dependency.clone();
    wrapped.field = DefinitionField::new(
        dependency.field.name.clone(),
        DefinitionNode::new(Value::Object(stripped), node.path()),
    );
    wrapped.uuid = child_uuid;
    wrapped.parent_id = Some(dependency.uuid.clone());
    wrapped.next_node_id = None;

    Ok((strategy_node, wrapped))
}

/// The concurrency cap of a strategy block.
#[must_use]
pub fn max_concurrency(strategy: &Value) -> Option<usize> {
    strategy
        .get(MAX_CONCURRENCY)
        .or_else(|| strategy.pointer("/repeat/maxConcurrency"))
        .or_else(|| strategy.pointer("/matrix/maxConcurrency"))
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
}

/// Expands a strategy block into one metadata entry per iteration.
///
/// Supported forms are `repeat.times`, `repeat.items` and `matrix` axes.
/// Matrix combinations are ordered by axis name.
pub fn expand(strategy: &Value) -> Result<Vec<StrategyMetadata>, String> {
    if let Some(repeat) = strategy.get("repeat") {
        if let Some(times) = repeat.get("times") {
            let times = times
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or("repeat.times must be a non-negative integer")?;
            return Ok((0..times).map(|i| StrategyMetadata::new(i, times)).collect());
        }
        if let Some(items) = repeat.get("items").and_then(Value::as_array) {
            let total = u32::try_from(items.len()).map_err(|e| e.to_string())?;
            return Ok(items
                .iter()
                .zip(0..total)
                .map(|(item, i)| StrategyMetadata::new(i, total).with_item(item.clone()))
                .collect());
        }
        return Err("repeat needs times or items".to_string());
    }

    if let Some(matrix) = strategy.get("matrix").and_then(Value::as_object) {
        let axes: BTreeMap<&str, Vec<String>> = matrix
            .iter()
            .filter(|(key, _)| key.as_str() != MAX_CONCURRENCY && key.as_str() != "exclude")
            .map(|(key, values)| {
                let values: Vec<String> = values
                    .as_array()
                    .ok_or_else(|| format!("matrix axis '{key}' must be a list"))?
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Ok((key.as_str(), values))
            })
            .collect::<Result<_, String>>()?;
        if axes.is_empty() {
            return Err("matrix has no axes".to_string());
        }

        let mut combinations: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
        for (axis, values) in &axes {
            combinations = combinations
                .into_iter()
                .flat_map(|combination| {
                    values.iter().map(move |value| {
                        let mut next = combination.clone();
                        next.insert((*axis).to_string(), value.clone());
                        next
                    })
                })
                .collect();
        }
        let total = u32::try_from(combinations.len()).map_err(|e| e.to_string())?;
        return Ok(combinations
            .into_iter()
            .zip(0..total)
            .map(|(values, i)| StrategyMetadata::new(i, total).with_matrix_values(values))
            .collect());
    }

    Err("strategy needs repeat or matrix".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::AdviserObtainment;

    #[test]
    fn test_expand_repeat() {
        let times = expand(&json!({"repeat": {"times": 3}})).unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[2].current_iteration, 2);
        assert_eq!(times[2].total_iterations, 3);

        let items = expand(&json!({"repeat": {"items": ["eu", "us"]}})).unwrap();
        assert_eq!(items[1].item, Some(json!("us")));
    }

    #[test]
    fn test_expand_matrix() {
        let combos = expand(&json!({"matrix": {
            "os": ["linux", "mac"],
            "arch": ["x64", "arm"],
            "maxConcurrency": 2
        }}))
        .unwrap();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].matrix_values["arch"], "x64");
        assert_eq!(combos[0].matrix_values["os"], "linux");
        assert_eq!(combos[1].matrix_values["os"], "mac");
        assert_eq!(max_concurrency(&json!({"matrix": {"maxConcurrency": 2}})), Some(2));
    }

    #[test]
    fn test_expand_rejects_unknown() {
        assert!(expand(&json!({"parallelism": 3})).is_err());
        assert!(expand(&json!({"matrix": {"os": "linux"}})).is_err());
    }

    #[test]
    fn test_wrap_rewrites_ids() {
        let field = DefinitionField::new(
            "step",
            DefinitionNode::new(
                json!({
                    "identifier": "deploy",
                    "type": "Echo",
                    "strategy": {"repeat": {"times": 2}},
                    "failureStrategies": [{"onFailure": {"action": {"type": "Ignore"}}}]
                }),
                "steps/0/step",
            ),
        );
        let dep = Dependency::new(field)
            .with_parent("exec")
            .with_next(Some("after".into()));
        let strategy = strategy_of(&dep.field).cloned().unwrap();
        let (node, wrapped) = wrap(&dep, &strategy).unwrap();

        assert_eq!(node.uuid, dep.uuid);
        assert_eq!(node.identifier, "deploy");
        assert!(node.skip_expression_chain);
        assert_eq!(node.parent_id.as_deref(), Some("exec"));
        assert_eq!(node.next_node_id(), Some("after"));
        assert!(matches!(
            node.adviser_obtainments[0],
            AdviserObtainment::IgnoreFailure { .. }
        ));
        assert_eq!(node.child_references(), vec![format!("{}_strategy_child", dep.uuid)]);

        assert_eq!(wrapped.uuid, format!("{}_strategy_child", dep.uuid));
        assert_eq!(wrapped.parent_id.as_deref(), Some(dep.uuid.as_str()));
        assert!(wrapped.next_node_id.is_none());
        assert!(strategy_of(&wrapped.field).is_none());
        assert!(wrapped.field.node.get("failureStrategies").is_none());
        assert_eq!(wrapped.field.node.path(), dep.field.node.path());
    }
}
