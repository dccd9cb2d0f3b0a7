//! Stage creators.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{advisers_for, timeout_of, when_of};
use crate::core::ExecutionMode;
use crate::creation::creator::{type_set, CreationContext, Dependency, PartialPlanCreator};
use crate::creation::definition::{DefinitionNode, PIPELINE_FIELD};
use crate::errors::PlanCreationError;
use crate::plan::{PlanNode, CHILD_NODE_ID};
use crate::steps::step_types::stage_step_type;

const RESOLVED_SERVICE: &str = "resolvedService";

/// Creates Deployment, Custom and CI stages.
///
/// A stage runs its `service` section (if any) followed by its
/// `execution` section. A service may be taken from an earlier stage with
/// `useFromStage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagePlanCreator;

impl PartialPlanCreator for StagePlanCreator {
    fn name(&self) -> &str {
        "stage"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("stage", &["Deployment", "Custom", "CI"])])
    }

    fn create_children(
        &self,
        ctx: &mut CreationContext,
        dependency: &Dependency,
    ) -> Result<Vec<Dependency>, PlanCreationError> {
        let node = &dependency.field.node;
        let spec = node
            .field("spec")
            .ok_or_else(|| PlanCreationError::invalid_field(node.path(), "stage has no spec"))?;
        let execution = spec.node.field("execution").ok_or_else(|| {
            PlanCreationError::invalid_field(spec.node.path(), "stage has no execution")
        })?;
        let execution = Dependency::new(execution).with_parent(dependency.uuid.clone());

        let mut children = Vec::with_capacity(2);
        if let Some(service) = spec.node.field("service") {
            let resolved = resolve_service(ctx, &service.node)?;
            children.push(
                Dependency::new(service)
                    .with_parent(dependency.uuid.clone())
                    .with_next(Some(execution.uuid.clone()))
                    .with_metadata(RESOLVED_SERVICE, resolved),
            );
        }
        children.push(execution);
        Ok(children)
    }

    fn create_parent(
        &self,
        ctx: &mut CreationContext,
        dependency: &Dependency,
        children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let node = &dependency.field.node;
        let identifier = node.require_identifier()?;
        let step_type = node
            .node_type()
            .and_then(stage_step_type)
            .ok_or_else(|| PlanCreationError::NoCreator {
                field: dependency.field.name.clone(),
                node_type: node.node_type().unwrap_or_default().to_string(),
            })?;
        let first = children.first().ok_or_else(|| {
            PlanCreationError::invalid_field(node.path(), "stage has no sections")
        })?;
        let service = children
            .iter()
            .find_map(|c| c.metadata.get(RESOLVED_SERVICE))
            .cloned();
        ctx.record_stage(identifier, service);

        stage_node(dependency, step_type, ExecutionMode::Child, json!({ CHILD_NODE_ID: first.uuid }))
    }
}

/// Creates a stage that runs another pipeline.
///
/// The child pipeline is carried inline under `spec.pipeline`. A child
/// pipeline must not contain pipeline stages of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStagePlanCreator;

impl PartialPlanCreator for PipelineStagePlanCreator {
    fn name(&self) -> &str {
        "pipeline-stage"
    }

    fn supported_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        type_set(&[("stage", &["Pipeline"])])
    }

    fn create_parent(
        &self,
        ctx: &mut CreationContext,
        dependency: &Dependency,
        _children: &[Dependency],
    ) -> Result<PlanNode, PlanCreationError> {
        let node = &dependency.field.node;
        let identifier = node.require_identifier()?;
        if ctx.is_child_pipeline() {
            return Err(PlanCreationError::NestedChaining {
                stage: identifier.to_string(),
            });
        }
        let child = node.value().pointer("/spec/pipeline").ok_or_else(|| {
            PlanCreationError::invalid_field(node.path(), "pipeline stage has no spec.pipeline")
        })?;
        if contains_pipeline_stage(child) {
            return Err(PlanCreationError::NestedChaining {
                stage: identifier.to_string(),
            });
        }
        let inputs = node
            .value()
            .pointer("/spec/inputs")
            .cloned()
            .unwrap_or_else(|| json!({}));
        ctx.record_stage(identifier, None);

        let step_type = stage_step_type("Pipeline").ok_or_else(|| PlanCreationError::NoCreator {
            field: dependency.field.name.clone(),
            node_type: "Pipeline".to_string(),
        })?;
        stage_node(
            dependency,
            step_type,
            ExecutionMode::Async,
            json!({ PIPELINE_FIELD: { PIPELINE_FIELD: child }, "inputs": inputs }),
        )
    }
}

fn stage_node(
    dependency: &Dependency,
    step_type: crate::core::StepType,
    mode: ExecutionMode,
    parameters: Value,
) -> Result<PlanNode, PlanCreationError> {
    let node = &dependency.field.node;
    let identifier = node.require_identifier()?;
    let mut plan_node = PlanNode::new(dependency.uuid.clone(), identifier, step_type, mode)
        .with_name(node.name().unwrap_or(identifier))
        .with_group("STAGE")
        .with_parameters(parameters)
        .with_advisers(advisers_for(node, dependency.next_node_id.as_deref())?);
    if let Some(timeout) = timeout_of(node)? {
        plan_node = plan_node.with_timeout_ms(timeout);
    }
    if let Some(when) = when_of(node)? {
        plan_node = plan_node.with_when(when);
    }
    Ok(plan_node)
}

fn resolve_service(
    ctx: &CreationContext,
    service: &DefinitionNode,
) -> Result<Value, PlanCreationError> {
    let Some(reference) = service.value().pointer("/useFromStage/stage") else {
        return Ok(service.value().clone());
    };
    let stage = reference.as_str().unwrap_or_default();
    match ctx.stage_service(stage) {
        Some(Some(value)) => Ok(value.clone()),
        Some(None) => Err(PlanCreationError::UnresolvedReference {
            path: service.path().to_string(),
            reference: stage.to_string(),
            message: format!("stage '{stage}' defines no service"),
        }),
        None => Err(PlanCreationError::UnresolvedReference {
            path: service.path().to_string(),
            reference: stage.to_string(),
            message: format!("stage '{stage}' is not an earlier stage of this pipeline"),
        }),
    }
}

/// True if any stage below `value` is a pipeline stage.
pub(crate) fn contains_pipeline_stage(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, v)| {
            (key == "stage" && v.get("type").and_then(Value::as_str) == Some("Pipeline"))
                || contains_pipeline_stage(v)
        }),
        Value::Array(items) => items.iter().any(contains_pipeline_stage),
        _ => false,
    }
}
