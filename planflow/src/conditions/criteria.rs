//! Approval criteria with pluggable condition evaluation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::StepError;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    /// Value equals.
    Equals,
    /// Value differs.
    NotEquals,
    /// Value is one of a comma separated list.
    In,
    /// Value is none of a comma separated list.
    NotIn,
}

/// One key/operator/value test against the approval inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Input key.
    pub key: String,
    /// Operator.
    pub operator: Operator,
    /// Expected value (comma separated for `In`/`NotIn`).
    pub value: String,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Evaluates a single condition.
pub trait ConditionEvaluator: Send + Sync {
    /// Returns whether `condition` holds for `inputs`.
    fn evaluate(&self, condition: &Condition, inputs: &Map<String, Value>)
        -> Result<bool, StepError>;
}

/// Compares the stringified input value with the expected value.
///
/// A missing key never equals anything, so `Equals`/`In` are false and
/// `NotEquals`/`NotIn` are true.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(
        &self,
        condition: &Condition,
        inputs: &Map<String, Value>,
    ) -> Result<bool, StepError> {
        let actual = inputs.get(&condition.key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let in_list = |actual: &str| {
            condition
                .value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == actual)
        };
        Ok(match condition.operator {
            Operator::Equals => actual.as_deref() == Some(condition.value.as_str()),
            Operator::NotEquals => actual.as_deref() != Some(condition.value.as_str()),
            Operator::In => actual.as_deref().is_some_and(in_list),
            Operator::NotIn => !actual.as_deref().is_some_and(in_list),
        })
    }
}

/// A set of conditions combined with AND (`match_any == false`) or OR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Criteria {
    /// OR semantics when true.
    #[serde(default)]
    pub match_any: bool,
    /// The conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Criteria {
    /// Criteria requiring every condition.
    #[must_use]
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            match_any: false,
            conditions,
        }
    }

    /// Criteria requiring any condition.
    #[must_use]
    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            match_any: true,
            conditions,
        }
    }

    /// Evaluates the criteria, short-circuiting as soon as the result is known.
    ///
    /// An empty AND is true and an empty OR is false.
    pub fn evaluate(
        &self,
        inputs: &Map<String, Value>,
        evaluator: &dyn ConditionEvaluator,
    ) -> Result<bool, StepError> {
        for condition in &self.conditions {
            let matched = evaluator.evaluate(condition, inputs)?;
            if self.match_any && matched {
                return Ok(true);
            }
            if !self.match_any && !matched {
                return Ok(false);
            }
        }
        Ok(!self.match_any)
    }
}
