//! Safeguards configuration parser.

use crate::error::{Result, SafeguardsError};
use crate::policy::SafeguardPolicy;
use serde::{Deserialize, Serialize};

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detects format from file extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            Some(ConfigFormat::Yaml)
        } else if path.ends_with(".json") {
            Some(ConfigFormat::Json)
        } else {
            None
        }
    }

    /// Detects format from content.
    pub fn detect(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            ConfigFormat::Json
        } else {
            ConfigFormat::Yaml
        }
    }
}

/// The safeguard policies configured for a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeguardsConfig {
    /// Policies in evaluation order.
    #[serde(default)]
    pub policies: Vec<SafeguardPolicy>,
}

impl SafeguardsConfig {
    /// Creates a configuration from policies.
    pub fn new(policies: Vec<SafeguardPolicy>) -> Self {
        Self { policies }
    }

    /// Parses a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SafeguardsConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SafeguardsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SafeguardsError::SerializationError(e.to_string()))
    }

    /// Serializes the configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SafeguardsError::SerializationError(e.to_string()))
    }

    /// Validates every policy.
    pub fn validate(&self) -> Result<()> {
        for (index, policy) in self.policies.iter().enumerate() {
            policy.validate().map_err(|err| {
                SafeguardsError::ValidationError(format!("policy #{}: {}", index + 1, err))
            })?;
        }
        Ok(())
    }
}

/// Parses a configuration from a string, auto-detecting format.
///
/// Besides a `{ policies: [...] }` document, a bare list of policies is
/// accepted.
pub fn parse_config(content: &str) -> Result<SafeguardsConfig> {
    let format = ConfigFormat::detect(content);
    parse_config_with_format(content, format)
}

/// Parses a configuration from a string with specified format.
pub fn parse_config_with_format(content: &str, format: ConfigFormat) -> Result<SafeguardsConfig> {
    let value: serde_json::Value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| SafeguardsError::ParseError(e.to_string()))?,
    };
    let config = if value.is_array() {
        SafeguardsConfig::new(
            serde_json::from_value(value).map_err(|e| SafeguardsError::ParseError(e.to_string()))?,
        )
    } else {
        serde_json::from_value(value).map_err(|e| SafeguardsError::ParseError(e.to_string()))?
    };
    config.validate()?;
    Ok(config)
}

/// Parses policies from a YAML stream with one policy per document.
pub fn parse_policies_yaml(content: &str) -> Result<Vec<SafeguardPolicy>> {
    let mut policies = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let policy: SafeguardPolicy = serde_yaml::from_value(value)?;
        policy.validate()?;
        policies.push(policy);
    }

    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnforcementLevel;

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::detect(r#"{"policies": []}"#), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect("  [ ]"), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect("policies: []"), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_extension("safeguards.yml"), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_extension("safeguards.json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("safeguards.toml"), None);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
policies:
  - title: Stage must be dev
    config: jsonata("declaration.provider[stage='dev']")
  - title: Region allow list
    enforcementLevel: warning
    config: |
      // us regions only
      declaration.provider.region.startsWith('us-')
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies[1].enforcement_level, EnforcementLevel::Warning);
    }

    #[test]
    fn test_parse_json_with_encoded_rules() {
        let json = r#"{"policies": [{"title": "dev", "safeguardName": "javascript", "config": "\"5==5\""}]}"#;
        let config = parse_config(json).unwrap();
        assert_eq!(config.policies[0].rule_spec(), "5==5");
    }

    #[test]
    fn test_parse_bare_list() {
        let config = parse_config("- title: one\n  config: 1 == 1\n").unwrap();
        assert_eq!(config.policies.len(), 1);
    }

    #[test]
    fn test_parse_multiple_documents() {
        let yaml = r#"
title: first
config: 1 == 1
---
title: second
config: 2 == 2
"#;
        let policies = parse_policies_yaml(yaml).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[1].title, "second");
    }

    #[test]
    fn test_rejects_untitled_policy() {
        let err = parse_config(r#"{"policies": [{"title": "", "config": "1 == 1"}]}"#).unwrap_err();
        assert!(matches!(err, SafeguardsError::ValidationError(_)));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = SafeguardsConfig::new(vec![SafeguardPolicy::javascript("t", "1 == 1")]);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(SafeguardsConfig::from_yaml(&yaml).unwrap(), config);
    }
}
