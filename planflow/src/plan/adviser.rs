//! Adviser obtainments: routing rules evaluated on a node's terminal status.

use serde::{Deserialize, Serialize};

use crate::core::Status;

/// What a retry adviser does once every attempt is used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExhaustedAction {
    /// Keep the failure and propagate it.
    #[default]
    MarkAsFailure,
    /// Ignore the failure and continue.
    Ignore,
    /// Abort the whole execution.
    Abort,
}

/// A routing rule attached to a plan node.
///
/// Obtainments are evaluated in order; the first one that can advise on the
/// node's terminal status decides the next action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserObtainment {
    /// Proceed to the next node of the chain.
    NextStep {
        /// The next plan node.
        next_node_id: String,
    },
    /// Re-run the node on failure.
    Retry {
        /// Attempts after the first run.
        retry_count: u32,
        /// Wait before each attempt; the last entry repeats.
        #[serde(default)]
        wait_intervals_ms: Vec<u64>,
        /// What happens once attempts run out.
        #[serde(default)]
        on_exhausted: ExhaustedAction,
    },
    /// Flag the failure as ignored and continue.
    IgnoreFailure {
        /// Where to continue; `None` ends the chain.
        #[serde(default)]
        next_node_id: Option<String>,
    },
    /// Mark the node failed; optionally jump to a rollback node.
    OnFail {
        /// Rollback target.
        #[serde(default)]
        next_node_id: Option<String>,
    },
    /// Abort the whole execution on failure.
    AbortOnFailure,
}

impl AdviserObtainment {
    /// Returns true if this obtainment reacts to `status`.
    #[must_use]
    pub fn can_advise(&self, status: Status, failure_ignored: bool) -> bool {
        match self {
            Self::NextStep { .. } => status.is_positive() || failure_ignored,
            Self::Retry { .. }
            | Self::IgnoreFailure { .. }
            | Self::OnFail { .. }
            | Self::AbortOnFailure => status.is_failure() && !failure_ignored,
        }
    }

    /// The plan node this obtainment may route to.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::NextStep { next_node_id } => Some(next_node_id),
            Self::IgnoreFailure { next_node_id } | Self::OnFail { next_node_id } => {
                next_node_id.as_deref()
            }
            Self::Retry { .. } | Self::AbortOnFailure => None,
        }
    }

    /// Wait before attempt number `attempt` (1-based).
    #[must_use]
    pub fn retry_wait_ms(&self, attempt: u32) -> u64 {
        match self {
            Self::Retry {
                wait_intervals_ms, ..
            } => {
                let last = wait_intervals_ms.len().saturating_sub(1);
                let idx = (attempt.saturating_sub(1) as usize).min(last);
                wait_intervals_ms.get(idx).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_advise() {
        let next = AdviserObtainment::NextStep {
            next_node_id: "b".into(),
        };
        assert!(next.can_advise(Status::Succeeded, false));
        assert!(next.can_advise(Status::Skipped, false));
        assert!(next.can_advise(Status::Failed, true));
        assert!(!next.can_advise(Status::Failed, false));
        assert!(!next.can_advise(Status::Aborted, false));

        let on_fail = AdviserObtainment::OnFail { next_node_id: None };
        assert!(on_fail.can_advise(Status::Errored, false));
        assert!(!on_fail.can_advise(Status::Aborted, false));
    }

    #[test]
    fn test_retry_wait_repeats_last() {
        let retry = AdviserObtainment::Retry {
            retry_count: 3,
            wait_intervals_ms: vec![10, 20],
            on_exhausted: ExhaustedAction::MarkAsFailure,
        };
        assert_eq!(retry.retry_wait_ms(1), 10);
        assert_eq!(retry.retry_wait_ms(2), 20);
        assert_eq!(retry.retry_wait_ms(3), 20);
    }

    #[test]
    fn test_serde_tag() {
        let json = serde_json::to_value(AdviserObtainment::NextStep {
            next_node_id: "x".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "NEXT_STEP");
        let back: AdviserObtainment =
            serde_json::from_value(serde_json::json!({"type": "ABORT_ON_FAILURE"})).unwrap();
        assert_eq!(back, AdviserObtainment::AbortOnFailure);
    }
}
