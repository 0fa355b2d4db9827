//! Error types for the safeguards plugin.

use thiserror::Error;

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, SafeguardsError>;

/// Errors raised outside the policy engine boundary.
#[derive(Debug, Error)]
pub enum SafeguardsError {
    /// Configuration document could not be parsed.
    #[error("Failed to parse safeguards configuration: {0}")]
    ParseError(String),

    /// Configuration validation failed.
    #[error("Safeguards configuration error: {0}")]
    ValidationError(String),

    /// The data context root is not an object.
    #[error("Invalid deployment context: {0}")]
    InvalidContext(String),

    /// Required field is missing from the deployment inputs.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Version control metadata could not be read.
    #[error("Version control error: {0}")]
    VersionControl(String),

    /// Log destination lookup is not available in the region.
    #[error("Lambda log collection is not supported in {0}")]
    UnsupportedRegion(String),

    /// Log destination lookup failed.
    #[error("Log destination error: {0}")]
    LogDestination(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for SafeguardsError {
    fn from(err: serde_json::Error) -> Self {
        SafeguardsError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SafeguardsError {
    fn from(err: serde_yaml::Error) -> Self {
        SafeguardsError::ParseError(err.to_string())
    }
}

impl From<regex::Error> for SafeguardsError {
    fn from(err: regex::Error) -> Self {
        SafeguardsError::InternalError(format!("Invalid regex: {}", err))
    }
}

/// Failure while tokenizing, parsing or evaluating one expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Nothing to evaluate.
    #[error("Empty expression")]
    Empty,

    /// The text is not valid in either sublanguage.
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// A binding referenced by the expression does not exist.
    #[error("{0} is not defined")]
    UndefinedBinding(String),

    /// Evaluation threw (member access on undefined, bad operand, ...).
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl ExpressionError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        ExpressionError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        ExpressionError::Evaluation(message.into())
    }
}

/// A rule that could not be evaluated, carrying the verbatim rule text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Error in the policy statement: \"{expression}\"")]
pub struct EvalError {
    /// The rule text exactly as it was handed to the evaluator.
    pub expression: String,

    /// What went wrong.
    #[source]
    pub source: ExpressionError,
}

impl EvalError {
    pub fn new(expression: impl Into<String>, source: ExpressionError) -> Self {
        Self {
            expression: expression.into(),
            source,
        }
    }
}
