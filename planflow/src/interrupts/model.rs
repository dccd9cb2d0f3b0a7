//! Interrupt records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::utils::{generate_uuid, now_utc, Timestamp};

/// The kind of control signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    /// Abort a node subtree, or the whole execution without a node target.
    Abort,
    /// Abort every running node of the execution.
    AbortAll,
    /// Hold not-yet-started nodes.
    Pause,
    /// Release held nodes.
    Resume,
    /// Force a waiting node to EXPIRED.
    Expire,
    /// A named signal that is only recorded and announced.
    Custom(String),
}

impl InterruptType {
    /// Returns true for types that stay active until the execution
    /// concludes or is resumed.
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::Abort | Self::AbortAll | Self::Pause)
    }

    /// Returns true for the abort family.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort | Self::AbortAll)
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "ABORT"),
            Self::AbortAll => write!(f, "ABORT_ALL"),
            Self::Pause => write!(f, "PAUSE"),
            Self::Resume => write!(f, "RESUME"),
            Self::Expire => write!(f, "EXPIRE"),
            Self::Custom(name) => write!(f, "CUSTOM({name})"),
        }
    }
}

/// Payload carried by an interrupt and forwarded when it is re-issued
/// against a nested execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InterruptConfig {
    /// User or system that issued the interrupt.
    pub issued_by: String,
    /// Free-form reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Interrupt this one was derived from, when re-issued into a child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_interrupt_id: Option<Uuid>,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl InterruptConfig {
    /// Creates a config issued by `issued_by`.
    #[must_use]
    pub fn issued_by(issued_by: impl Into<String>) -> Self {
        Self {
            issued_by: issued_by.into(),
            ..Default::default()
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy of this config marked as derived from `source`.
    #[must_use]
    pub fn derived_from(&self, source: Uuid) -> Self {
        let mut config = self.clone();
        config.source_interrupt_id = Some(source);
        config
    }
}

/// Lifecycle of an interrupt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    /// Recorded, not yet applied.
    #[default]
    Registered,
    /// Being applied, or active until the execution settles.
    Processing,
    /// Applied and no longer active.
    Processed,
    /// Dropped without effect.
    Discarded,
}

impl InterruptState {
    /// Returns true while the interrupt still blocks duplicates.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Registered | Self::Processing)
    }
}

/// A request to interrupt an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// Signal type.
    pub interrupt_type: InterruptType,
    /// Target execution.
    pub plan_execution_id: Uuid,
    /// Optional target node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<Uuid>,
    /// Payload.
    #[serde(default)]
    pub config: InterruptConfig,
}

impl InterruptRequest {
    /// Creates an execution-wide request.
    #[must_use]
    pub fn new(interrupt_type: InterruptType, plan_execution_id: Uuid, config: InterruptConfig) -> Self {
        Self {
            interrupt_type,
            plan_execution_id,
            node_execution_id: None,
            config,
        }
    }

    /// Targets a specific node.
    #[must_use]
    pub fn for_node(mut self, node_execution_id: Uuid) -> Self {
        self.node_execution_id = Some(node_execution_id);
        self
    }
}

/// A registered interrupt, retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Interrupt id.
    pub uuid: Uuid,
    /// Signal type.
    pub interrupt_type: InterruptType,
    /// Target execution.
    pub plan_execution_id: Uuid,
    /// Optional target node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<Uuid>,
    /// Payload.
    pub config: InterruptConfig,
    /// Lifecycle state.
    pub state: InterruptState,
    /// Registration time.
    pub created_at: Timestamp,
}

impl Interrupt {
    /// Builds a fresh record from a request.
    #[must_use]
    pub fn from_request(request: InterruptRequest) -> Self {
        Self {
            uuid: generate_uuid(),
            interrupt_type: request.interrupt_type,
            plan_execution_id: request.plan_execution_id,
            node_execution_id: request.node_execution_id,
            config: request.config,
            state: InterruptState::Registered,
            created_at: now_utc(),
        }
    }

    /// Returns true if `other` has the same type and target.
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.interrupt_type == other.interrupt_type
            && self.plan_execution_id == other.plan_execution_id
            && self.node_execution_id == other.node_execution_id
    }
}

/// Result of registering an interrupt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptOutcome {
    /// Recorded and applied.
    Registered {
        /// The new interrupt id.
        interrupt_id: Uuid,
    },
    /// An identical interrupt is still active; nothing was done.
    AlreadyPending {
        /// The active interrupt id.
        interrupt_id: Uuid,
    },
    /// Recorded but had nothing to act on (e.g. the execution already finished).
    Ignored {
        /// The recorded interrupt id.
        interrupt_id: Uuid,
        /// Why it was ignored.
        reason: String,
    },
}

impl InterruptOutcome {
    /// The interrupt id the outcome refers to.
    #[must_use]
    pub fn interrupt_id(&self) -> Uuid {
        match self {
            Self::Registered { interrupt_id }
            | Self::AlreadyPending { interrupt_id }
            | Self::Ignored { interrupt_id, .. } => *interrupt_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_types() {
        assert!(InterruptType::Abort.is_sticky());
        assert!(InterruptType::Pause.is_sticky());
        assert!(!InterruptType::Resume.is_sticky());
        assert!(!InterruptType::Custom("x".into()).is_sticky());
        assert_eq!(InterruptType::AbortAll.to_string(), "ABORT_ALL");
    }

    #[test]
    fn test_same_target() {
        let exec = Uuid::new_v4();
        let a = Interrupt::from_request(InterruptRequest::new(
            InterruptType::Abort,
            exec,
            InterruptConfig::issued_by("alice"),
        ));
        let b = Interrupt::from_request(InterruptRequest::new(
            InterruptType::Abort,
            exec,
            InterruptConfig::issued_by("bob"),
        ));
        let c = Interrupt::from_request(
            InterruptRequest::new(InterruptType::Abort, exec, InterruptConfig::default())
                .for_node(Uuid::new_v4()),
        );
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn test_derived_config_keeps_payload() {
        let source = Uuid::new_v4();
        let config = InterruptConfig::issued_by("alice")
            .with_reason("stop")
            .with_metadata("ticket", "42");
        let derived = config.derived_from(source);
        assert_eq!(derived.source_interrupt_id, Some(source));
        assert_eq!(derived.metadata.get("ticket"), Some(&"42".to_string()));
        assert_eq!(derived.reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_outcome_serde() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(InterruptOutcome::AlreadyPending { interrupt_id: id }).unwrap();
        assert_eq!(json["outcome"], "ALREADY_PENDING");
    }
}
