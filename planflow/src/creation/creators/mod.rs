//! Built-in partial plan creators and the helpers they share.

mod parallel;
mod pipeline;
mod sections;
mod stage;
mod step;

pub use parallel::ParallelPlanCreator;
pub use pipeline::{PipelinePlanCreator, StagesPlanCreator};
pub use sections::{ExecutionPlanCreator, ServicePlanCreator, StepGroupPlanCreator};
pub use stage::{PipelineStagePlanCreator, StagePlanCreator};
pub use step::StepPlanCreator;

use serde_json::Value;

use super::creator::Dependency;
use super::definition::DefinitionNode;
use crate::conditions::WhenCondition;
use crate::errors::PlanCreationError;
use crate::plan::{AdviserObtainment, ExhaustedAction};
use crate::utils::parse_duration;

/// Turns a list such as `steps` or `stages` into a chain of dependencies:
/// every element routes to the next one.
pub(crate) fn chain_dependencies(
    list: &DefinitionNode,
    parent_id: &str,
) -> Result<Vec<Dependency>, PlanCreationError> {
    let elements = list.array_elements();
    if elements.is_empty() {
        return Err(PlanCreationError::invalid_field(
            list.path(),
            "expected a non-empty list",
        ));
    }
    let fields = elements
        .iter()
        .map(DefinitionNode::single_field)
        .collect::<Result<Vec<_>, _>>()?;
    let ids: Vec<String> = fields.iter().map(|f| f.node.uuid()).collect();
    Ok(fields
        .into_iter()
        .enumerate()
        .map(|(i, field)| {
            Dependency::new(field)
                .with_parent(parent_id)
                .with_next(ids.get(i + 1).cloned())
        })
        .collect())
}

/// Reads the optional `timeout` property.
pub(crate) fn timeout_of(node: &DefinitionNode) -> Result<Option<u64>, PlanCreationError> {
    let Some(raw) = node.get("timeout").and_then(Value::as_str) else {
        return Ok(None);
    };
    let duration = parse_duration(raw)
        .map_err(|e| PlanCreationError::invalid_field(format!("{}/timeout", node.path()), e.to_string()))?;
    Ok(Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)))
}

/// Reads the optional `when` property.
pub(crate) fn when_of(node: &DefinitionNode) -> Result<Option<WhenCondition>, PlanCreationError> {
    node.get("when")
        .map(|raw| {
            serde_json::from_value(raw.clone()).map_err(|e| {
                PlanCreationError::invalid_field(format!("{}/when", node.path()), e.to_string())
            })
        })
        .transpose()
}

/// Translates `failureStrategies` plus the chain successor into ordered
/// adviser obtainments: retry, ignore, fail handling, then next step.
pub(crate) fn advisers_for(
    node: &DefinitionNode,
    next_node_id: Option<&str>,
) -> Result<Vec<AdviserObtainment>, PlanCreationError> {
    let mut retry = None;
    let mut ignore = None;
    let mut on_fail = None;

    let strategies = node
        .get("failureStrategies")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for (i, strategy) in strategies.iter().enumerate() {
        let path = format!("{}/failureStrategies/{i}", node.path());
        let action = strategy
            .pointer("/onFailure/action")
            .ok_or_else(|| PlanCreationError::invalid_field(&path, "missing onFailure.action"))?;
        match action_type(action, &path)? {
            "Retry" => {
                retry.get_or_insert(retry_adviser(action, &path)?);
            }
            "Ignore" => {
                ignore.get_or_insert(AdviserObtainment::IgnoreFailure {
                    next_node_id: next_node_id.map(str::to_string),
                });
            }
            "MarkAsFailure" | "StageRollback" => {
                on_fail.get_or_insert(AdviserObtainment::OnFail { next_node_id: None });
            }
            "Abort" => {
                on_fail.get_or_insert(AdviserObtainment::AbortOnFailure);
            }
            other => {
                return Err(PlanCreationError::invalid_field(
                    path,
                    format!("unknown failure action '{other}'"),
                ))
            }
        }
    }

    let mut advisers: Vec<AdviserObtainment> = [retry, ignore, on_fail].into_iter().flatten().collect();
    if let Some(next) = next_node_id {
        advisers.push(AdviserObtainment::NextStep {
            next_node_id: next.to_string(),
        });
    }
    Ok(advisers)
}

fn action_type<'a>(action: &'a Value, path: &str) -> Result<&'a str, PlanCreationError> {
    action
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PlanCreationError::invalid_field(path, "missing action type"))
}

fn retry_adviser(action: &Value, path: &str) -> Result<AdviserObtainment, PlanCreationError> {
    let spec = action.get("spec").cloned().unwrap_or(Value::Null);
    let retry_count = spec
        .get("retryCount")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| PlanCreationError::invalid_field(path, "retry needs a retryCount"))?;
    let wait_intervals_ms = spec
        .get("retryIntervals")
        .and_then(Value::as_array)
        .map(|intervals| {
            intervals
                .iter()
                .map(|raw| {
                    let text = raw.as_str().unwrap_or_default();
                    parse_duration(text)
                        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                        .map_err(|e| PlanCreationError::invalid_field(path, e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    let on_exhausted = match spec.pointer("/onRetryFailure/action/type").and_then(Value::as_str) {
        None | Some("MarkAsFailure") => ExhaustedAction::MarkAsFailure,
        Some("Ignore") => ExhaustedAction::Ignore,
        Some("Abort") => ExhaustedAction::Abort,
        Some(other) => {
            return Err(PlanCreationError::invalid_field(
                path,
                format!("unknown retry failure action '{other}'"),
            ))
        }
    };
    Ok(AdviserObtainment::Retry {
        retry_count,
        wait_intervals_ms,
        on_exhausted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_advisers_are_ordered() {
        let node = DefinitionNode::new(
            json!({
                "failureStrategies": [
                    {"onFailure": {"action": {"type": "MarkAsFailure"}}},
                    {"onFailure": {"action": {"type": "Retry", "spec": {
                        "retryCount": 2,
                        "retryIntervals": ["1s", "5s"],
                        "onRetryFailure": {"action": {"type": "Ignore"}}
                    }}}}
                ]
            }),
            "step",
        );
        let advisers = advisers_for(&node, Some("next")).unwrap();
        assert_eq!(
            advisers,
            vec![
                AdviserObtainment::Retry {
                    retry_count: 2,
                    wait_intervals_ms: vec![1_000, 5_000],
                    on_exhausted: ExhaustedAction::Ignore,
                },
                AdviserObtainment::OnFail { next_node_id: None },
                AdviserObtainment::NextStep {
                    next_node_id: "next".into()
                },
            ]
        );
    }

    #[test]
    fn test_no_strategies_only_next() {
        let node = DefinitionNode::new(json!({}), "step");
        assert!(advisers_for(&node, None).unwrap().is_empty());
        assert_eq!(advisers_for(&node, Some("b")).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let node = DefinitionNode::new(
            json!({"failureStrategies": [{"onFailure": {"action": {"type": "Explode"}}}]}),
            "step",
        );
        assert_eq!(
            advisers_for(&node, None).unwrap_err().code(),
            "PLAN-005-INVALID_FIELD"
        );
    }

    #[test]
    fn test_timeout_and_when() {
        let node = DefinitionNode::new(
            json!({"timeout": "1m30s", "when": {"pipelineStatus": "All"}}),
            "step",
        );
        assert_eq!(timeout_of(&node).unwrap(), Some(90_000));
        assert!(when_of(&node).unwrap().is_some());

        let bad = DefinitionNode::new(json!({"timeout": "soon"}), "step");
        assert!(timeout_of(&bad).is_err());
    }

    #[test]
    fn test_chain_links_successors() {
        let list = DefinitionNode::new(
            json!([{"step": {"identifier": "a"}}, {"step": {"identifier": "b"}}]),
            "steps",
        );
        let deps = chain_dependencies(&list, "parent").unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].next_node_id.as_deref(), Some(deps[1].uuid.as_str()));
        assert!(deps[1].next_node_id.is_none());
        assert_eq!(deps[1].parent_id.as_deref(), Some("parent"));

        assert!(chain_dependencies(&DefinitionNode::new(json!([]), "steps"), "p").is_err());
    }
}
