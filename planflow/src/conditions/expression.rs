//! A small boolean expression evaluator for when-conditions.
//!
//! Supported syntax: `<+inputs.path>` and `<+pipeline.status>` references,
//! quoted or bare literals, `==`, `!=`, `&&` and `||` (`&&` binds tighter).
//! Parentheses are not supported.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::errors::StepError;

static REFERENCE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<\+([A-Za-z_][A-Za-z0-9_.]*)>"));

/// Values that expressions can reference.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    /// Execution inputs.
    pub inputs: Value,
    /// True once any node of the execution failed.
    pub has_failure: bool,
}

impl EvaluationContext {
    /// Creates a context over the given inputs.
    #[must_use]
    pub fn new(inputs: Value) -> Self {
        Self {
            inputs,
            has_failure: false,
        }
    }

    /// Sets the failure flag.
    #[must_use]
    pub fn with_failure(mut self, has_failure: bool) -> Self {
        self.has_failure = has_failure;
        self
    }

    fn resolve(&self, reference: &str) -> Result<String, StepError> {
        if reference == "pipeline.status" {
            let status = if self.has_failure { "FAILED" } else { "SUCCEEDED" };
            return Ok(status.to_string());
        }
        let path = reference.strip_prefix("inputs.").ok_or_else(|| {
            StepError::Evaluation(format!("unsupported reference <+{reference}>"))
        })?;
        let value = path
            .split('.')
            .try_fold(&self.inputs, |v, key| v.get(key))
            .ok_or_else(|| StepError::Evaluation(format!("unresolved reference <+{reference}>")))?;
        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Evaluates when-condition expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Replaces every reference with its quoted value.
    pub fn render(&self, expression: &str, ctx: &EvaluationContext) -> Result<String, StepError> {
        let pattern = REFERENCE
            .as_ref()
            .map_err(|e| StepError::Evaluation(e.to_string()))?;
        let mut rendered = String::with_capacity(expression.len());
        let mut last = 0;
        for captures in pattern.captures_iter(expression) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            rendered.push_str(&expression[last..whole.start()]);
            rendered.push('"');
            rendered.push_str(&ctx.resolve(name.as_str())?);
            rendered.push('"');
            last = whole.end();
        }
        rendered.push_str(&expression[last..]);
        Ok(rendered)
    }

    /// Evaluates an expression to a boolean.
    pub fn evaluate(&self, expression: &str, ctx: &EvaluationContext) -> Result<bool, StepError> {
        let rendered = self.render(expression, ctx)?;
        for disjunct in rendered.split("||") {
            let mut all = true;
            for term in disjunct.split("&&") {
                if !Self::term(term)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn term(term: &str) -> Result<bool, StepError> {
        if let Some((left, right)) = term.split_once("==") {
            return Ok(literal(left) == literal(right));
        }
        if let Some((left, right)) = term.split_once("!=") {
            return Ok(literal(left) != literal(right));
        }
        match literal(term) {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(StepError::Evaluation(format!(
                "expected a boolean, found '{other}'"
            ))),
        }
    }
}

fn literal(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(json!({"env": "prod", "deploy": {"enabled": true}}))
    }

    #[test]
    fn test_literals() {
        let e = ExpressionEvaluator::new();
        assert!(e.evaluate("true", &ctx()).unwrap());
        assert!(!e.evaluate(" false ", &ctx()).unwrap());
        assert!(e.evaluate("false || true", &ctx()).unwrap());
        assert!(!e.evaluate("true && false", &ctx()).unwrap());
    }

    #[test]
    fn test_references() {
        let e = ExpressionEvaluator::new();
        assert!(e.evaluate(r#"<+inputs.env> == "prod""#, &ctx()).unwrap());
        assert!(e.evaluate("<+inputs.deploy.enabled>", &ctx()).unwrap());
        assert!(e
            .evaluate(r#"<+inputs.env> != 'qa' && <+pipeline.status> == SUCCEEDED"#, &ctx())
            .unwrap());
        assert!(e
            .evaluate("<+pipeline.status> == FAILED", &ctx().with_failure(true))
            .unwrap());
    }

    #[test]
    fn test_errors() {
        let e = ExpressionEvaluator::new();
        assert!(e.evaluate("<+inputs.missing> == x", &ctx()).is_err());
        assert!(e.evaluate("<+stage.name> == x", &ctx()).is_err());
        assert!(e.evaluate("maybe", &ctx()).is_err());
    }

    #[test]
    fn test_render_quotes_values() {
        let rendered = ExpressionEvaluator::new()
            .render("<+inputs.env>", &ctx())
            .unwrap();
        assert_eq!(rendered, "\"prod\"");
    }
}
