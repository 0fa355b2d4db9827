//! Core types shared by safeguard policies and their results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Safeguard implementations this crate can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeguardKind {
    /// Rules written as structured queries or boolean expressions.
    Javascript,
}

impl SafeguardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeguardKind::Javascript => "javascript",
        }
    }
}

impl fmt::Display for SafeguardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the deployment when a policy fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    /// Report the failure, let the deployment continue.
    Warning,
    /// Block the deployment.
    #[default]
    Error,
}

impl EnforcementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementLevel::Warning => "warning",
            EnforcementLevel::Error => "error",
        }
    }
}

/// Outcome of one safeguard policy as reported to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeguardStatus {
    Passed,
    Warned,
    Failed,
}

impl SafeguardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeguardStatus::Passed => "passed",
            SafeguardStatus::Warned => "warned",
            SafeguardStatus::Failed => "failed",
        }
    }

    /// Status of a policy that did not approve, given its enforcement level.
    pub fn for_failure(level: EnforcementLevel) -> Self {
        match level {
            EnforcementLevel::Warning => SafeguardStatus::Warned,
            EnforcementLevel::Error => SafeguardStatus::Failed,
        }
    }
}

impl fmt::Display for SafeguardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
