//! Conditions: approval criteria and when-conditions.

mod criteria;
mod expression;
mod when;

pub use criteria::{
    Condition, ConditionEvaluator, Criteria, DefaultConditionEvaluator, Operator,
};
pub use expression::{EvaluationContext, ExpressionEvaluator};
pub use when::{PipelineStatusFilter, WhenCondition};
