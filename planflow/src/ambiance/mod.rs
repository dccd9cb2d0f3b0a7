//! Ambiance: the immutable addressing context of one execution position.
//!
//! An [`Ambiance`] is a stack of [`Level`]s (one per enclosing node
//! execution) plus execution-scoped abstractions such as account and
//! project. A child ambiance is always a strict extension of its parent's
//! level stack; nested cancellation and graph parent derivation rely on it.

mod level;
mod metadata;

pub use level::{Level, StrategyMetadata};
pub use metadata::{ExecutionMetadata, ParentExecutionInfo, TriggerType};

use crate::core::StepCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Setup abstraction key for the account id.
pub const ACCOUNT_KEY: &str = "accountId";
/// Setup abstraction key for the organization identifier.
pub const ORG_KEY: &str = "orgIdentifier";
/// Setup abstraction key for the project identifier.
pub const PROJECT_KEY: &str = "projectIdentifier";

const STAGES_GROUP: &str = "STAGES";
const PARALLEL_IDENTIFIER: &str = "parallel";

/// The nesting context of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambiance {
    /// The owning plan execution.
    pub plan_execution_id: Uuid,
    /// The plan being executed.
    pub plan_id: String,
    /// Enclosing levels, outermost first.
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Execution-scoped routing context (account, org, project, ...).
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Trigger metadata of the owning execution.
    pub metadata: ExecutionMetadata,
}

impl Ambiance {
    /// Creates the root ambiance of a plan execution.
    #[must_use]
    pub fn new(
        plan_execution_id: Uuid,
        plan_id: impl Into<String>,
        setup_abstractions: BTreeMap<String, String>,
        metadata: ExecutionMetadata,
    ) -> Self {
        Self {
            plan_execution_id,
            plan_id: plan_id.into(),
            levels: Vec::new(),
            setup_abstractions,
            metadata,
        }
    }

    /// Returns a copy extended by one level.
    #[must_use]
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut child = self.clone();
        child.levels.push(level);
        child
    }

    /// Returns a copy with the last level removed.
    #[must_use]
    pub fn clone_for_finish(&self) -> Self {
        self.clone_to_depth(self.levels.len().saturating_sub(1))
    }

    /// Returns a copy truncated to at most `depth` levels.
    #[must_use]
    pub fn clone_to_depth(&self, depth: usize) -> Self {
        let mut copy = self.clone();
        copy.levels.truncate(depth);
        copy
    }

    /// Returns true if `self` strictly extends `other`'s level stack.
    #[must_use]
    pub fn is_strict_extension_of(&self, other: &Self) -> bool {
        self.plan_execution_id == other.plan_execution_id
            && self.levels.len() > other.levels.len()
            && self
                .levels
                .iter()
                .zip(&other.levels)
                .all(|(a, b)| a.runtime_id == b.runtime_id)
    }

    /// Account id from the setup abstractions.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstractions.get(ACCOUNT_KEY).map(String::as_str)
    }

    /// Organization identifier from the setup abstractions.
    #[must_use]
    pub fn org_identifier(&self) -> Option<&str> {
        self.setup_abstractions.get(ORG_KEY).map(String::as_str)
    }

    /// Project identifier from the setup abstractions.
    #[must_use]
    pub fn project_identifier(&self) -> Option<&str> {
        self.setup_abstractions.get(PROJECT_KEY).map(String::as_str)
    }

    /// The innermost level.
    #[must_use]
    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Node execution id of the innermost level.
    #[must_use]
    pub fn current_runtime_id(&self) -> Option<Uuid> {
        self.current_level().map(|l| l.runtime_id)
    }

    /// Plan node id of the innermost level.
    #[must_use]
    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.setup_id.as_str())
    }

    /// Step type name of the innermost level.
    #[must_use]
    pub fn current_step_type(&self) -> Option<&str> {
        self.current_level().map(|l| l.step_type.type_name.as_str())
    }

    /// Group of the innermost level.
    #[must_use]
    pub fn current_group(&self) -> Option<&str> {
        self.current_level().and_then(|l| l.group.as_deref())
    }

    /// Node execution id of the level enclosing the innermost one.
    #[must_use]
    pub fn parent_runtime_id(&self) -> Option<Uuid> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        Some(self.levels[len - 2].runtime_id)
    }

    /// Nearest enclosing stage level.
    #[must_use]
    pub fn stage_level(&self) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|l| l.step_type.category == StepCategory::Stage)
    }

    /// Nearest enclosing level that carries strategy metadata.
    #[must_use]
    pub fn strategy_level(&self) -> Option<&Level> {
        self.levels
            .iter()
            .rev()
            .find(|l| l.strategy_metadata.is_some())
    }

    /// Returns true when the innermost level is a strategy wrapping a stage,
    /// i.e. it sits directly under the stages section (possibly through a
    /// parallel fork).
    #[must_use]
    pub fn is_current_strategy_level_at_stage(&self) -> bool {
        let len = self.levels.len();
        if len < 2 {
            return false;
        }
        self.levels[..len - 1]
            .iter()
            .rev()
            .find(|l| l.step_type.category != StepCategory::Fork)
            .and_then(|l| l.group.as_deref())
            .is_some_and(|g| g == STAGES_GROUP)
    }

    /// Fully qualified name of this position, e.g.
    /// `pipeline.stages.deploy.spec.execution.shell`.
    ///
    /// Strategy levels and bare parallel forks are left out.
    #[must_use]
    pub fn fqn(&self) -> String {
        self.levels
            .iter()
            .filter(|l| !l.skip_expression_chain && l.identifier != PARALLEL_IDENTIFIER)
            .map(|l| l.identifier.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Runtime ids of every level, outermost first.
    #[must_use]
    pub fn runtime_ids(&self) -> Vec<Uuid> {
        self.levels.iter().map(|l| l.runtime_id).collect()
    }
}
