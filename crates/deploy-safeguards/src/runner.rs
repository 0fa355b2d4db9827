//! Runs every configured safeguard policy against one deployment.

use crate::context::DeploymentContext;
use crate::decision::SafeguardsReport;
use crate::error::Result;
use crate::parser::{self, SafeguardsConfig};
use crate::policy::SafeguardPolicy;
use std::time::Instant;

/// The safeguards runner.
#[derive(Debug, Clone, Default)]
pub struct SafeguardsRunner {
    policies: Vec<SafeguardPolicy>,
}

impl SafeguardsRunner {
    /// Creates a new runner with no policies.
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Creates a runner from a loaded configuration.
    pub fn from_config(config: SafeguardsConfig) -> Self {
        Self {
            policies: config.policies,
        }
    }

    /// Adds a policy to the runner.
    pub fn add_policy(&mut self, policy: SafeguardPolicy) -> Result<()> {
        policy.validate()?;
        self.policies.push(policy);
        Ok(())
    }

    /// Loads policies from a YAML configuration.
    pub fn load_config_yaml(&mut self, yaml: &str) -> Result<()> {
        let config = SafeguardsConfig::from_yaml(yaml)?;
        self.policies.extend(config.policies);
        Ok(())
    }

    /// Loads policies from a JSON configuration.
    pub fn load_config_json(&mut self, json: &str) -> Result<()> {
        let config = SafeguardsConfig::from_json(json)?;
        self.policies.extend(config.policies);
        Ok(())
    }

    /// Loads policies from a configuration in either format.
    pub fn load_config(&mut self, content: &str) -> Result<()> {
        let config = parser::parse_config(content)?;
        self.policies.extend(config.policies);
        Ok(())
    }

    /// Number of configured policies.
    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Configured policies in evaluation order.
    pub fn policies(&self) -> &[SafeguardPolicy] {
        &self.policies
    }

    /// Evaluates all policies against the context.
    pub fn run(&self, context: &DeploymentContext) -> SafeguardsReport {
        let start = Instant::now();

        let results: Vec<_> = self
            .policies
            .iter()
            .map(|policy| {
                let result = policy.check(context);
                tracing::info!(
                    title = %result.title,
                    status = %result.status,
                    "Safeguard evaluated"
                );
                result
            })
            .collect();

        let report = SafeguardsReport::new(results);
        tracing::debug!(
            policies = self.policies.len(),
            blocked = report.is_blocked(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Safeguards run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::NONCOMPLIANT_MESSAGE;
    use crate::types::{EnforcementLevel, SafeguardStatus};
    use serde_json::json;

    fn dev_context() -> DeploymentContext {
        DeploymentContext::from_declaration(json!({
            "service": "orders",
            "provider": { "name": "aws", "stage": "dev", "region": "us-east-1" }
        }))
    }

    #[test]
    fn test_empty_runner() {
        let report = SafeguardsRunner::new().run(&dev_context());
        assert!(report.results.is_empty());
        assert!(!report.is_blocked());
    }

    #[test]
    fn test_run_in_configuration_order() {
        let config = r#"
policies:
  - title: Stage must be dev
    config: jsonata("declaration.provider[stage='dev']")
  - title: Region must be eu
    enforcementLevel: warning
    config: declaration.provider.region.startsWith('eu-')
  - title: Broken statement
    config: this is not a valid query
"#;
        let mut runner = SafeguardsRunner::new();
        runner.load_config_yaml(config).unwrap();
        assert_eq!(runner.policy_count(), 3);

        let report = runner.run(&dev_context());
        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                SafeguardStatus::Passed,
                SafeguardStatus::Warned,
                SafeguardStatus::Failed
            ]
        );
        assert_eq!(report.results[1].reason.as_deref(), Some(NONCOMPLIANT_MESSAGE));
        assert_eq!(
            report.results[2].reason.as_deref(),
            Some("Error in the policy statement: \"this is not a valid query\"")
        );
        assert!(report.is_blocked());
    }

    #[test]
    fn test_warning_does_not_block() {
        let mut runner = SafeguardsRunner::new();
        runner
            .add_policy(
                SafeguardPolicy::javascript("prod only", "declaration.provider.stage == 'prod'")
                    .with_enforcement_level(EnforcementLevel::Warning),
            )
            .unwrap();

        let report = runner.run(&dev_context());
        assert_eq!(report.count(SafeguardStatus::Warned), 1);
        assert!(!report.is_blocked());
    }

    #[test]
    fn test_add_policy_validates() {
        let mut runner = SafeguardsRunner::new();
        assert!(runner.add_policy(SafeguardPolicy::javascript("", "1 == 1")).is_err());
        assert_eq!(runner.policy_count(), 0);
    }

    #[test]
    fn test_load_json_config() {
        let mut runner = SafeguardsRunner::new();
        runner
            .load_config(r#"[{"title": "t", "config": "\"declaration.service == 'orders'\""}]"#)
            .unwrap();
        let report = runner.run(&dev_context());
        assert_eq!(report.count(SafeguardStatus::Passed), 1);
    }
}
