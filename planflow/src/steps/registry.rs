//! Step registry keyed by step type name.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{
    ApprovalStep, DelegateTaskStep, EchoStep, ForkStep, PipelineStageStep, SectionChainStep,
    ServiceConfigStep, StrategyStep, SyncDelegateStep,
};
use super::executable::StepExecutable;
use super::step_types::{
    APPROVAL, CI_STAGE, CUSTOM_STAGE, DEPLOYMENT_STAGE, ECHO, EXECUTION_SECTION, FORK, HTTP,
    PIPELINE_SECTION, PIPELINE_STAGE, SERVICE_CONFIG, SHELL_SCRIPT, STAGES_SECTION, STEP_GROUP,
    STRATEGY,
};
use crate::conditions::DefaultConditionEvaluator;
use crate::core::ExecutionMode;

/// Registry of step executables.
#[derive(Default)]
pub struct StepRegistry {
    steps: RwLock<HashMap<String, StepExecutable>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in step type.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let sections = StepExecutable::child(SectionChainStep);
        for name in [
            PIPELINE_SECTION,
            STAGES_SECTION,
            DEPLOYMENT_STAGE,
            CUSTOM_STAGE,
            CI_STAGE,
            EXECUTION_SECTION,
            STEP_GROUP,
        ] {
            registry.register(name, sections.clone());
        }
        registry.register(FORK, StepExecutable::children(ForkStep));
        registry.register(STRATEGY, StepExecutable::children(StrategyStep));
        registry.register(SERVICE_CONFIG, StepExecutable::sync(ServiceConfigStep));
        registry.register(PIPELINE_STAGE, StepExecutable::asynchronous(PipelineStageStep));
        registry.register(ECHO, StepExecutable::sync(EchoStep));
        registry.register(
            SHELL_SCRIPT,
            StepExecutable::asynchronous(DelegateTaskStep::new("SHELL_SCRIPT")),
        );
        registry.register(HTTP, StepExecutable::sync(SyncDelegateStep::new("HTTP")));
        registry.register(
            APPROVAL,
            StepExecutable::asynchronous(ApprovalStep::new(Arc::new(DefaultConditionEvaluator))),
        );
        registry
    }

    /// Registers an executable, replacing any earlier one for the same type.
    pub fn register(&self, step_type: impl Into<String>, executable: StepExecutable) {
        self.steps.write().insert(step_type.into(), executable);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_step(self, step_type: impl Into<String>, executable: StepExecutable) -> Self {
        self.register(step_type, executable);
        self
    }

    /// The executable for a step type.
    #[must_use]
    pub fn get(&self, step_type: &str) -> Option<StepExecutable> {
        self.steps.read().get(step_type).cloned()
    }

    /// The mode of every registered step type.
    #[must_use]
    pub fn modes(&self) -> HashMap<String, ExecutionMode> {
        self.steps
            .read()
            .iter()
            .map(|(name, step)| (name.clone(), step.mode()))
            .collect()
    }

    /// Number of registered step types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.read().is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.steps.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("StepRegistry").field("steps", &names).finish()
    }
}
