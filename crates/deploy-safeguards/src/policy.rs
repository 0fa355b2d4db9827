//! Safeguard policy definitions.

use crate::context::DeploymentContext;
use crate::decision::{SafeguardResult, Verdict};
use crate::engine;
use crate::error::{Result, SafeguardsError};
use crate::types::{EnforcementLevel, SafeguardKind};
use serde::{Deserialize, Serialize};

/// One configured safeguard policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeguardPolicy {
    /// Human-readable title, used to report the result.
    pub title: String,

    /// Which safeguard evaluates the policy.
    #[serde(default = "default_safeguard")]
    pub safeguard_name: SafeguardKind,

    /// The rule specification.
    ///
    /// Accepted either as plain text or as a JSON-encoded string, the form
    /// the configuration transport uses.
    #[serde(default)]
    pub config: String,

    /// What a failure of this policy means for the deployment.
    #[serde(default)]
    pub enforcement_level: EnforcementLevel,

    /// Description of what this policy enforces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_safeguard() -> SafeguardKind {
    SafeguardKind::Javascript
}

impl SafeguardPolicy {
    /// Creates a javascript policy enforced at error level.
    pub fn javascript(title: impl Into<String>, rules: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            safeguard_name: SafeguardKind::Javascript,
            config: rules.into(),
            enforcement_level: EnforcementLevel::Error,
            description: None,
        }
    }

    /// Sets the enforcement level.
    pub fn with_enforcement_level(mut self, level: EnforcementLevel) -> Self {
        self.enforcement_level = level;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The rule specification with any JSON string wrapping removed.
    pub fn rule_spec(&self) -> String {
        let trimmed = self.config.trim_start();
        if trimmed.starts_with('"') {
            if let Ok(decoded) = engine::decode_options(self.config.trim()) {
                return decoded;
            }
        }
        self.config.clone()
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(SafeguardsError::ValidationError(
                "Policy title is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Evaluates the policy against a context.
    pub fn evaluate(&self, context: &DeploymentContext) -> Verdict {
        match self.safeguard_name {
            SafeguardKind::Javascript => engine::evaluate_policy(context, &self.rule_spec()),
        }
    }

    /// Evaluates the policy and derives the reported result.
    pub fn check(&self, context: &DeploymentContext) -> SafeguardResult {
        SafeguardResult::from_verdict(
            self.title.clone(),
            self.safeguard_name,
            self.enforcement_level,
            self.evaluate(context),
        )
    }
}
