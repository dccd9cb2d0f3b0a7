//! Execution status, facilitation mode and step category enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a node execution or plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet started.
    #[default]
    Queued,
    /// Work is in progress.
    Running,
    /// Waiting on an async callback.
    AsyncWaiting,
    /// Held by a pause interrupt.
    Paused,
    /// Completed successfully.
    Succeeded,
    /// The work failed.
    Failed,
    /// The engine could not run the work.
    Errored,
    /// The deadline passed before a response arrived.
    Expired,
    /// Aborted by an interrupt.
    Aborted,
    /// Never started because its when-condition was false.
    Skipped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::AsyncWaiting => "ASYNC_WAITING",
            Self::Paused => "PAUSED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Errored => "ERRORED",
            Self::Expired => "EXPIRED",
            Self::Aborted => "ABORTED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

impl Status {
    /// Returns true if the status is terminal. Terminal statuses are never left.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Errored
                | Self::Expired
                | Self::Aborted
                | Self::Skipped
        )
    }

    /// Returns true for statuses that let the flow proceed.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Returns true for statuses that failure strategies react to.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Errored | Self::Expired)
    }

    /// Returns true while a node is neither finished nor queued.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::AsyncWaiting | Self::Paused)
    }

    /// Checks whether moving from `self` to `next` is allowed.
    ///
    /// Terminal statuses accept nothing. `Queued` is only re-entered from
    /// `Paused`, and a status never transitions to itself.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        match next {
            Self::Queued => *self == Self::Paused,
            Self::AsyncWaiting => matches!(self, Self::Running | Self::Paused),
            _ => true,
        }
    }

    /// Aggregates the terminal statuses of a set of children into the parent status.
    ///
    /// Precedence is Aborted > Errored > Failed > Expired > Succeeded. An empty set
    /// or a set made only of skipped children yields `Skipped`. Callers map
    /// ignored failures to `Succeeded` before aggregating.
    #[must_use]
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        let rank = |s: Self| match s {
            Self::Aborted => 5,
            Self::Errored => 4,
            Self::Failed => 3,
            Self::Expired => 2,
            Self::Skipped => 0,
            _ => 1,
        };
        let mut worst = Self::Skipped;
        for status in statuses {
            let candidate = if status.is_terminal() {
                status
            } else {
                Self::Errored
            };
            if rank(candidate) > rank(worst) {
                worst = candidate;
            }
        }
        match rank(worst) {
            0 => Self::Skipped,
            1 => Self::Succeeded,
            _ => worst,
        }
    }
}

/// How a node is driven to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Runs inline to completion.
    #[default]
    Sync,
    /// Starts work and resumes on a callback.
    Async,
    /// Spawns exactly one child and waits on it.
    Child,
    /// Spawns a set of children and waits on all of them.
    Children,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "SYNC"),
            Self::Async => write!(f, "ASYNC"),
            Self::Child => write!(f, "CHILD"),
            Self::Children => write!(f, "CHILDREN"),
        }
    }
}

/// The structural category of a step type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    /// The pipeline root.
    Pipeline,
    /// The stages section.
    Stages,
    /// A stage.
    Stage,
    /// A section inside a stage (service, execution).
    Section,
    /// A step group.
    StepGroup,
    /// A leaf step.
    #[default]
    Step,
    /// A parallel fork.
    Fork,
    /// A strategy (looping) wrapper.
    Strategy,
}

impl fmt::Display for StepCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "PIPELINE"),
            Self::Stages => write!(f, "STAGES"),
            Self::Stage => write!(f, "STAGE"),
            Self::Section => write!(f, "SECTION"),
            Self::StepGroup => write!(f, "STEP_GROUP"),
            Self::Step => write!(f, "STEP"),
            Self::Fork => write!(f, "FORK"),
            Self::Strategy => write!(f, "STRATEGY"),
        }
    }
}

/// A step type: its registry name plus its structural category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepType {
    /// The registry name (e.g., "ShellScript").
    #[serde(rename = "type")]
    pub type_name: String,
    /// The structural category.
    pub category: StepCategory,
}

impl StepType {
    /// Creates a new step type.
    #[must_use]
    pub fn new(type_name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            type_name: type_name.into(),
            category,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

/// How a skipped node is rendered in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipType {
    /// Not skipped.
    #[default]
    NoOp,
    /// The node itself is skipped.
    SkipNode,
    /// The node and its whole subtree are skipped.
    SkipTree,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::AsyncWaiting.to_string(), "ASYNC_WAITING");
        assert_eq!(Status::Succeeded.to_string(), "SUCCEEDED");
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(Status::Succeeded.is_terminal());
        assert!(Status::Skipped.is_terminal());
        assert!(Status::Expired.is_terminal());
        assert!(!Status::Queued.is_terminal());
        assert!(!Status::AsyncWaiting.is_terminal());
        assert!(!Status::Paused.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(Status::Queued.can_transition_to(Status::Running));
        assert!(Status::Queued.can_transition_to(Status::Skipped));
        assert!(Status::Running.can_transition_to(Status::AsyncWaiting));
        assert!(Status::AsyncWaiting.can_transition_to(Status::Succeeded));
        assert!(Status::Paused.can_transition_to(Status::Queued));
        assert!(!Status::Running.can_transition_to(Status::Queued));
        assert!(!Status::Queued.can_transition_to(Status::AsyncWaiting));
        assert!(!Status::Succeeded.can_transition_to(Status::Aborted));
        assert!(!Status::Running.can_transition_to(Status::Running));
    }

    #[test]
    fn test_aggregate_precedence() {
        use Status::*;
        assert_eq!(Status::aggregate([Succeeded, Failed, Aborted]), Aborted);
        assert_eq!(Status::aggregate([Failed, Errored]), Errored);
        assert_eq!(Status::aggregate([Expired, Failed]), Failed);
        assert_eq!(Status::aggregate([Succeeded, Expired]), Expired);
        assert_eq!(Status::aggregate([Succeeded, Skipped]), Succeeded);
        assert_eq!(Status::aggregate([Skipped, Skipped]), Skipped);
        assert_eq!(Status::aggregate([]), Skipped);
    }

    #[test]
    fn test_aggregate_non_terminal_is_error() {
        assert_eq!(
            Status::aggregate([Status::Succeeded, Status::Running]),
            Status::Errored
        );
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&Status::AsyncWaiting).unwrap();
        assert_eq!(json, r#""ASYNC_WAITING""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::AsyncWaiting);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ExecutionMode::Children.to_string(), "CHILDREN");
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Async).unwrap(),
            r#""ASYNC""#
        );
    }

    #[test]
    fn test_step_type() {
        let st = StepType::new("ShellScript", StepCategory::Step);
        assert_eq!(st.to_string(), "ShellScript");
        assert_eq!(StepCategory::StepGroup.to_string(), "STEP_GROUP");
    }
}
