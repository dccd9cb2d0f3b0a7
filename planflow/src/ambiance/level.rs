//! Ambiance levels.

use crate::core::StepType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One entry of an ambiance level stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// The node execution id.
    pub runtime_id: Uuid,
    /// The plan node id.
    pub setup_id: String,
    /// Human identifier of the node.
    pub identifier: String,
    /// Step type of the node.
    pub step_type: StepType,
    /// Optional group qualifier (e.g. "STAGES", "STAGE").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Left out of fully qualified names.
    #[serde(default)]
    pub skip_expression_chain: bool,
    /// Set on strategy iteration levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,
    /// Retry attempt of the node execution.
    #[serde(default)]
    pub retry_index: u32,
    /// Start time, unix milliseconds.
    #[serde(default)]
    pub start_ts: i64,
}

impl Level {
    /// Creates a level.
    #[must_use]
    pub fn new(
        runtime_id: Uuid,
        setup_id: impl Into<String>,
        identifier: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            runtime_id,
            setup_id: setup_id.into(),
            identifier: identifier.into(),
            step_type,
            group: None,
            skip_expression_chain: false,
            strategy_metadata: None,
            retry_index: 0,
            start_ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Sets the group qualifier.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the skip-expression-chain flag.
    #[must_use]
    pub fn with_skip_expression_chain(mut self, skip: bool) -> Self {
        self.skip_expression_chain = skip;
        self
    }

    /// Attaches strategy metadata.
    #[must_use]
    pub fn with_strategy_metadata(mut self, metadata: StrategyMetadata) -> Self {
        self.strategy_metadata = Some(metadata);
        self
    }

    /// Sets the retry index.
    #[must_use]
    pub fn with_retry_index(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }
}

/// Position of one iteration within a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetadata {
    /// Zero-based iteration index.
    pub current_iteration: u32,
    /// Total iterations of the strategy.
    pub total_iterations: u32,
    /// Matrix axis values of this iteration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix_values: BTreeMap<String, String>,
    /// Item of a repeat-items iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<serde_json::Value>,
}

impl StrategyMetadata {
    /// Creates iteration metadata.
    #[must_use]
    pub fn new(current_iteration: u32, total_iterations: u32) -> Self {
        Self {
            current_iteration,
            total_iterations,
            matrix_values: BTreeMap::new(),
            item: None,
        }
    }

    /// Sets the matrix values.
    #[must_use]
    pub fn with_matrix_values(mut self, values: BTreeMap<String, String>) -> Self {
        self.matrix_values = values;
        self
    }

    /// Sets the repeat item.
    #[must_use]
    pub fn with_item(mut self, item: serde_json::Value) -> Self {
        self.item = Some(item);
        self
    }
}
