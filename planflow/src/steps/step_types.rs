//! Built-in step type names.

use crate::core::{ExecutionMode, StepCategory, StepType};

/// Pipeline root section.
pub const PIPELINE_SECTION: &str = "PIPELINE_SECTION";
/// The stages section.
pub const STAGES_SECTION: &str = "STAGES_STEP";
/// Parallel fork.
pub const FORK: &str = "NG_FORK";
/// Strategy wrapper.
pub const STRATEGY: &str = "STRATEGY";
/// Deployment stage.
pub const DEPLOYMENT_STAGE: &str = "DEPLOYMENT_STAGE_STEP";
/// Custom stage.
pub const CUSTOM_STAGE: &str = "CUSTOM_STAGE";
/// CI stage.
pub const CI_STAGE: &str = "CI_STAGE";
/// Stage running a child pipeline.
pub const PIPELINE_STAGE: &str = "PIPELINE_STAGE";
/// Service section of a stage.
pub const SERVICE_CONFIG: &str = "SERVICE_CONFIG";
/// Execution section of a stage.
pub const EXECUTION_SECTION: &str = "NG_EXECUTION";
/// Step group.
pub const STEP_GROUP: &str = "STEP_GROUP";

/// Shell script run by a remote worker.
pub const SHELL_SCRIPT: &str = "ShellScript";
/// HTTP call run by a remote worker, waited on inline.
pub const HTTP: &str = "Http";
/// Echoes its parameters.
pub const ECHO: &str = "Echo";
/// Manual approval.
pub const APPROVAL: &str = "Approval";

/// Leaf step types with their facilitator modes.
#[must_use]
pub fn leaf_step_modes() -> Vec<(&'static str, ExecutionMode)> {
    vec![
        (SHELL_SCRIPT, ExecutionMode::Async),
        (HTTP, ExecutionMode::Sync),
        (ECHO, ExecutionMode::Sync),
        (APPROVAL, ExecutionMode::Async),
    ]
}

/// Stage step type for a stage `type` tag.
#[must_use]
pub fn stage_step_type(stage_type: &str) -> Option<StepType> {
    let name = match stage_type {
        "Deployment" => DEPLOYMENT_STAGE,
        "Custom" => CUSTOM_STAGE,
        "CI" => CI_STAGE,
        "Pipeline" => PIPELINE_STAGE,
        _ => return None,
    };
    Some(StepType::new(name, StepCategory::Stage))
}
