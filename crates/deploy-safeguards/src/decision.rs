//! Policy verdicts and safeguard results.

use crate::types::{EnforcementLevel, SafeguardKind, SafeguardStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason given when at least one rule evaluated to false.
pub const NONCOMPLIANT_MESSAGE: &str = "Must comply with all of the configured queries.";

/// The outcome of one policy invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Failed(String),
}

impl Verdict {
    /// The generic failure for rules that evaluated to false.
    pub fn noncompliant() -> Self {
        Verdict::Failed(NONCOMPLIANT_MESSAGE.to_string())
    }

    /// Returns true if the policy approved.
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }

    /// Returns true if the policy failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Verdict::Failed(_))
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Approved => None,
            Verdict::Failed(reason) => Some(reason),
        }
    }
}

/// The result of one configured safeguard policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeguardResult {
    /// Title of the policy.
    pub title: String,

    /// Safeguard that evaluated the policy.
    pub safeguard_name: SafeguardKind,

    /// Enforcement level the status was derived from.
    pub enforcement_level: EnforcementLevel,

    /// Reported status.
    pub status: SafeguardStatus,

    /// Failure reason, absent when the policy passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SafeguardResult {
    /// Derives the reported result from a verdict.
    pub fn from_verdict(
        title: impl Into<String>,
        safeguard_name: SafeguardKind,
        enforcement_level: EnforcementLevel,
        verdict: Verdict,
    ) -> Self {
        let (status, reason) = match verdict {
            Verdict::Approved => (SafeguardStatus::Passed, None),
            Verdict::Failed(reason) => (SafeguardStatus::for_failure(enforcement_level), Some(reason)),
        };
        Self {
            title: title.into(),
            safeguard_name,
            enforcement_level,
            status,
            reason,
        }
    }
}

/// Results of all safeguard policies for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeguardsReport {
    /// Results in configuration order.
    pub results: Vec<SafeguardResult>,

    /// When the policies were evaluated.
    pub evaluated_at: DateTime<Utc>,
}

impl SafeguardsReport {
    /// Creates a report stamped with the current time.
    pub fn new(results: Vec<SafeguardResult>) -> Self {
        Self {
            results,
            evaluated_at: Utc::now(),
        }
    }

    /// Returns true if any error-level policy failed.
    pub fn is_blocked(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == SafeguardStatus::Failed)
    }

    /// Number of results with the given status.
    pub fn count(&self, status: SafeguardStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Results that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &SafeguardResult> {
        self.results
            .iter()
            .filter(|r| r.status != SafeguardStatus::Passed)
    }
}
