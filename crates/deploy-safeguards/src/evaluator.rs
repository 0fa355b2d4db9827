//! Evaluation of a single rule expression.
//!
//! A rule is either a structured query wrapped in `jsonata("...")` or a
//! free-form boolean expression. Detection is by the shape of the whole
//! trimmed text; anything that is not exactly one `jsonata` call with a
//! string literal argument is parsed as a boolean expression (which may still
//! embed `jsonata` calls).

use crate::context::DeploymentContext;
use crate::error::{EvalError, ExpressionError};
use crate::expression::Expression;
use crate::lexer::{tokenize, TokenKind};
use crate::query::Query;
use regex::Regex;
use std::sync::OnceLock;

const QUERY_MARKER_PATTERN: &str =
    r#"(?s)^jsonata\(\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*\)$"#;

static QUERY_MARKER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

/// A parsed rule, ready to evaluate against any number of contexts.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpression {
    /// `jsonata("<query>")`: true when the query selects anything.
    Query(Query),
    /// Any other expression: true when it evaluates to a truthy value.
    Boolean(Expression),
}

impl RuleExpression {
    /// Parses rule text into one of the two sublanguages.
    pub fn parse(text: &str) -> std::result::Result<Self, ExpressionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExpressionError::Empty);
        }
        match query_body(trimmed)? {
            Some(query) => Ok(RuleExpression::Query(Query::parse(&query)?)),
            None => Ok(RuleExpression::Boolean(Expression::parse(trimmed)?)),
        }
    }

    /// Evaluates the rule against `context`.
    pub fn evaluate(&self, context: &DeploymentContext) -> std::result::Result<bool, ExpressionError> {
        match self {
            RuleExpression::Query(query) => query.matches(context.as_value()),
            RuleExpression::Boolean(expression) => expression.evaluate(context.as_value()),
        }
    }
}

/// Evaluates one rule. Every failure is reported as an [`EvalError`] naming
/// the rule text exactly as given.
pub fn evaluate(expression_text: &str, context: &DeploymentContext) -> Result<bool, EvalError> {
    let outcome = RuleExpression::parse(expression_text)
        .and_then(|rule| rule.evaluate(context))
        .map_err(|source| EvalError::new(expression_text, source));

    match &outcome {
        Ok(passed) => tracing::debug!(rule = expression_text, passed, "Rule evaluated"),
        Err(err) => tracing::debug!(rule = expression_text, error = %err.source, "Rule failed to evaluate"),
    }
    outcome
}

/// Extracts the unescaped query when `text` is exactly one `jsonata("...")` call.
fn query_body(text: &str) -> std::result::Result<Option<String>, ExpressionError> {
    let marker = QUERY_MARKER
        .get_or_init(|| Regex::new(QUERY_MARKER_PATTERN))
        .as_ref()
        .map_err(|err| ExpressionError::evaluation(format!("Invalid query marker: {}", err)))?;

    let Some(literal) = marker.captures(text).and_then(|caps| caps.get(1)) else {
        return Ok(None);
    };
    let mut tokens = tokenize(literal.as_str())?.into_iter().map(|t| t.kind);
    match (tokens.next(), tokens.next()) {
        (Some(TokenKind::Str(query)), Some(TokenKind::Eof)) => Ok(Some(query)),
        _ => Ok(None),
    }
}
