//! Deployment data context that safeguard rules are evaluated against.

use crate::error::{Result, SafeguardsError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Read-only snapshot of one deployment's declaration.
///
/// The tree is shared behind an [`Arc`] and never handed out mutably, so
/// every rule of an invocation sees the same data and clones are cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct DeploymentContext {
    root: Arc<Value>,
}

impl DeploymentContext {
    /// Creates a context from a JSON tree. The root must be an object.
    pub fn new(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(SafeguardsError::InvalidContext(format!(
                "expected an object at the root, got {}",
                kind_of(&root)
            )));
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Wraps a service declaration as `{ "declaration": ... }`.
    pub fn from_declaration(declaration: Value) -> Self {
        let mut root = Map::new();
        root.insert("declaration".to_string(), declaration);
        Self {
            root: Arc::new(Value::Object(root)),
        }
    }

    /// Parses a context from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Returns the whole tree.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Returns a top-level field.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Gets a value from the context by field path.
    ///
    /// Field paths use dot notation, numeric segments index into arrays:
    /// - "declaration.provider.stage"
    /// - "declaration.functions.hello.events.0"
    pub fn get_value(&self, field_path: &str) -> Option<&Value> {
        if field_path.is_empty() {
            return None;
        }
        field_path
            .split('.')
            .try_fold(self.root.as_ref(), |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// The deployment stage, when declared.
    pub fn stage(&self) -> Option<&str> {
        self.get_value("declaration.provider.stage")
            .and_then(Value::as_str)
    }

    /// The deployment region, when declared.
    pub fn region(&self) -> Option<&str> {
        self.get_value("declaration.provider.region")
            .and_then(Value::as_str)
    }
}

impl TryFrom<Value> for DeploymentContext {
    type Error = SafeguardsError;

    fn try_from(value: Value) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeploymentContext> for Value {
    fn from(context: DeploymentContext) -> Self {
        Arc::try_unwrap(context.root).unwrap_or_else(|shared| (*shared).clone())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
