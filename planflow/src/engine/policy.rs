//! Policy gate consulted before an execution starts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ambiance::ExecutionMetadata;
use crate::errors::EngineError;

/// Verdict of a policy gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the execution may start.
    pub allowed: bool,
    /// Why it was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extra data from the policy engine.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PolicyDecision {
    /// Allows the execution.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Refuses the execution.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// Decides whether a pipeline definition may be executed.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Evaluates a definition before its plan is built.
    async fn evaluate(
        &self,
        definition: &Value,
        metadata: &ExecutionMetadata,
    ) -> Result<PolicyDecision, EngineError>;
}

/// A gate that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PolicyGate for AllowAll {
    async fn evaluate(
        &self,
        _definition: &Value,
        _metadata: &ExecutionMetadata,
    ) -> Result<PolicyDecision, EngineError> {
        Ok(PolicyDecision::allow())
    }
}
