//! Records kept by the execution store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::ambiance::{Ambiance, ExecutionMetadata, StrategyMetadata};
use crate::core::{ExecutionMode, SkipType, Status, StepType};
use crate::plan::PlanNode;
use crate::utils::{now_utc, Timestamp};

/// One instantiation of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    /// Execution id.
    pub uuid: Uuid,
    /// Plan id.
    pub plan_id: String,
    /// Status; advanced monotonically, never reopened once terminal.
    pub status: Status,
    /// Execution inputs.
    #[serde(default)]
    pub inputs: Value,
    /// Trigger metadata.
    pub metadata: ExecutionMetadata,
    /// Routing context copied into every ambiance.
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// End time, set with the terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl PlanExecution {
    /// Creates a running execution.
    #[must_use]
    pub fn new(uuid: Uuid, plan_id: impl Into<String>, inputs: Value, metadata: ExecutionMetadata) -> Self {
        Self {
            uuid,
            plan_id: plan_id.into(),
            status: Status::Running,
            inputs,
            metadata,
            setup_abstractions: BTreeMap::new(),
            created_at: now_utc(),
            ended_at: None,
        }
    }

    /// Sets the setup abstractions.
    #[must_use]
    pub fn with_setup_abstractions(mut self, abstractions: BTreeMap<String, String>) -> Self {
        self.setup_abstractions = abstractions;
        self
    }
}

/// One execution attempt of one plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Node execution id.
    pub uuid: Uuid,
    /// Owning execution.
    pub plan_execution_id: Uuid,
    /// The plan node.
    pub plan_node_id: String,
    /// Position; its last level is this node.
    pub ambiance: Ambiance,
    /// Current status.
    pub status: Status,
    /// Facilitation mode.
    pub mode: ExecutionMode,
    /// Enclosing node execution, `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Previous node of the same chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<Uuid>,
    /// Step type.
    pub step_type: StepType,
    /// Human identifier (strategy iterations carry an `_<i>` suffix).
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Graph skip rendering.
    #[serde(default)]
    pub skip_type: SkipType,
    /// Store-assigned creation order.
    #[serde(default)]
    pub sequence: u64,
    /// Retry attempt number.
    #[serde(default)]
    pub retry_index: u32,
    /// Set on attempts superseded by a retry.
    #[serde(default)]
    pub old_retry: bool,
    /// Earlier attempts of this node, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_ids: Vec<Uuid>,
    /// The failure was ignored by a failure strategy.
    #[serde(default)]
    pub failure_ignored: bool,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Step outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    /// Advisement already ran.
    #[serde(default)]
    pub advised: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time the node started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Time the node reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl NodeExecution {
    /// Creates a queued node execution for `node` at `ambiance`.
    ///
    /// The ambiance must already carry this node's level.
    #[must_use]
    pub fn queued(uuid: Uuid, node: &PlanNode, ambiance: Ambiance) -> Self {
        let identifier = ambiance
            .current_level()
            .map_or_else(|| node.identifier.clone(), |l| l.identifier.clone());
        Self {
            uuid,
            plan_execution_id: ambiance.plan_execution_id,
            plan_node_id: node.uuid.clone(),
            ambiance,
            status: Status::Queued,
            mode: node.facilitator,
            parent_id: None,
            previous_id: None,
            step_type: node.step_type.clone(),
            name: node.name.clone(),
            identifier,
            skip_type: SkipType::NoOp,
            sequence: 0,
            retry_index: 0,
            old_retry: false,
            retry_ids: Vec::new(),
            failure_ignored: false,
            failure_message: None,
            outcome: None,
            advised: false,
            created_at: now_utc(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Sets the parent.
    #[must_use]
    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the previous chain member.
    #[must_use]
    pub fn with_previous(mut self, previous_id: Option<Uuid>) -> Self {
        self.previous_id = previous_id;
        self
    }

    /// Returns true once the node reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Status as seen by the enclosing node: ignored failures count as success.
    #[must_use]
    pub fn effective_status(&self) -> Status {
        if self.failure_ignored && self.status.is_failure() {
            Status::Succeeded
        } else {
            self.status
        }
    }

    /// Strategy metadata of this node's own level, if it is an iteration.
    #[must_use]
    pub fn strategy_metadata(&self) -> Option<&StrategyMetadata> {
        self.ambiance
            .current_level()
            .and_then(|l| l.strategy_metadata.as_ref())
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The node execution.
    pub node_execution_id: Uuid,
    /// Previous status.
    pub from: Status,
    /// New status.
    pub to: Status,
    /// When it happened.
    pub at: Timestamp,
}

/// Partial update of the non-status fields of a node execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    /// New outcome.
    pub outcome: Option<Value>,
    /// New failure message.
    pub failure_message: Option<String>,
    /// New failure-ignored flag.
    pub failure_ignored: Option<bool>,
    /// New old-retry flag.
    pub old_retry: Option<bool>,
    /// New skip type.
    pub skip_type: Option<SkipType>,
}

impl NodePatch {
    /// Sets the outcome.
    #[must_use]
    pub fn outcome(mut self, outcome: Value) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Sets the failure message.
    #[must_use]
    pub fn failure(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Flags the failure as ignored.
    #[must_use]
    pub fn ignore_failure(mut self) -> Self {
        self.failure_ignored = Some(true);
        self
    }

    /// Flags the attempt as superseded.
    #[must_use]
    pub fn old_retry(mut self) -> Self {
        self.old_retry = Some(true);
        self
    }

    /// Sets the skip type.
    #[must_use]
    pub fn skip_type(mut self, skip_type: SkipType) -> Self {
        self.skip_type = Some(skip_type);
        self
    }

    /// Applies the patch.
    pub fn apply(self, node: &mut NodeExecution) {
        if let Some(v) = self.outcome {
            node.outcome = Some(v);
        }
        if let Some(v) = self.failure_message {
            node.failure_message = Some(v);
        }
        if let Some(v) = self.failure_ignored {
            node.failure_ignored = v;
        }
        if let Some(v) = self.old_retry {
            node.old_retry = v;
        }
        if let Some(v) = self.skip_type {
            node.skip_type = v;
        }
    }
}

/// A child whose start is deferred by a concurrency cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChild {
    /// The plan node to start.
    pub plan_node_id: String,
    /// Iteration metadata for strategy children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyMetadata>,
}

impl PendingChild {
    /// A plain child.
    #[must_use]
    pub fn new(plan_node_id: impl Into<String>) -> Self {
        Self {
            plan_node_id: plan_node_id.into(),
            strategy: None,
        }
    }

    /// A strategy iteration.
    #[must_use]
    pub fn iteration(plan_node_id: impl Into<String>, strategy: StrategyMetadata) -> Self {
        Self {
            plan_node_id: plan_node_id.into(),
            strategy: Some(strategy),
        }
    }
}

/// Progress of a multi-child parent after one child chain finished.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildProgress {
    /// Child chains still running or deferred.
    pub remaining: usize,
    /// The next deferred child to start, if any.
    pub next: Option<PendingChild>,
}

/// Returned once every callback of a waiting node has a response.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResolution {
    /// The node that was waiting.
    pub node_execution_id: Uuid,
    /// Responses keyed by callback id.
    pub responses: BTreeMap<String, Value>,
}
