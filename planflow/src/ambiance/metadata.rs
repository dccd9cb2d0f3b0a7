//! Trigger metadata of a plan execution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Started by a user.
    #[default]
    Manual,
    /// Started by a webhook.
    Webhook,
    /// Started by a schedule.
    Scheduled,
    /// Started by a parent pipeline stage.
    Pipeline,
}

/// Links a nested execution to the node that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentExecutionInfo {
    /// The parent plan execution.
    pub plan_execution_id: Uuid,
    /// The parent's pipeline stage node execution.
    pub node_execution_id: Uuid,
}

/// Metadata describing who started an execution and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// Trigger type.
    pub trigger_type: TriggerType,
    /// User or system that triggered the run.
    pub triggered_by: String,
    /// Run sequence number, if assigned by the caller.
    #[serde(default)]
    pub run_sequence: u64,
    /// Parent execution for nested pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentExecutionInfo>,
}

impl ExecutionMetadata {
    /// Metadata for a manually triggered run.
    #[must_use]
    pub fn manual(triggered_by: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            triggered_by: triggered_by.into(),
            run_sequence: 0,
            parent: None,
        }
    }

    /// Metadata for a run triggered by a parent pipeline stage.
    #[must_use]
    pub fn child_of(parent: &Self, plan_execution_id: Uuid, node_execution_id: Uuid) -> Self {
        Self {
            trigger_type: TriggerType::Pipeline,
            triggered_by: parent.triggered_by.clone(),
            run_sequence: 0,
            parent: Some(ParentExecutionInfo {
                plan_execution_id,
                node_execution_id,
            }),
        }
    }

    /// Sets the trigger type.
    #[must_use]
    pub fn with_trigger_type(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    /// Sets the run sequence.
    #[must_use]
    pub fn with_run_sequence(mut self, run_sequence: u64) -> Self {
        self.run_sequence = run_sequence;
        self
    }

    /// Returns true for executions started by a parent pipeline.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_metadata_links_parent() {
        let parent = ExecutionMetadata::manual("alice");
        let (exec, node) = (Uuid::new_v4(), Uuid::new_v4());
        let child = ExecutionMetadata::child_of(&parent, exec, node);

        assert!(child.is_nested());
        assert_eq!(child.trigger_type, TriggerType::Pipeline);
        assert_eq!(child.triggered_by, "alice");
        assert_eq!(child.parent.unwrap().node_execution_id, node);
        assert!(!parent.is_nested());
    }
}
