//! Log-forwarding subscriptions for provisioned log groups.
//!
//! Every log group in the compiled stack template gets a subscription filter
//! that ships matching lines to the platform's log destination.

use crate::error::{Result, SafeguardsError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Resource type of a log group.
pub const LOG_GROUP_TYPE: &str = "AWS::Logs::LogGroup";

/// Resource type of a subscription filter.
pub const SUBSCRIPTION_FILTER_TYPE: &str = "AWS::Logs::SubscriptionFilter";

/// Filter for API gateway access logs.
pub const API_GATEWAY_FILTER_PATTERN: &str = "\"SLS_ACCESS_LOG\"";

/// Filter for function logs.
pub const LAMBDA_FILTER_PATTERN: &str = "?\"REPORT RequestId: \" ?\"SERVERLESS_ENTERPRISE\"";

const API_GATEWAY_LOG_GROUP_PREFIX: &str = "/aws/api-gateway/";
const SUBSCRIPTION_FILTER_PREFIX: &str = "CloudWatchLogsSubscriptionFilter";

/// A template resource of a given type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateResource<'a> {
    pub key: &'a str,
    pub resource: &'a Value,
}

/// Resources of `resource_type` in a stack template, in key order.
pub fn pick_resource_type<'a>(template: &'a Value, resource_type: &str) -> Vec<TemplateResource<'a>> {
    let Some(resources) = template.get("Resources").and_then(Value::as_object) else {
        return Vec::new();
    };
    resources
        .iter()
        .filter(|(_, resource)| resource.get("Type").and_then(Value::as_str) == Some(resource_type))
        .map(|(key, resource)| TemplateResource { key, resource })
        .collect()
}

/// Uppercases the first character.
pub fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Filter pattern for a log group name.
pub fn filter_pattern(log_group_name: Option<&str>) -> &'static str {
    match log_group_name {
        Some(name) if name.starts_with(API_GATEWAY_LOG_GROUP_PREFIX) => API_GATEWAY_FILTER_PATTERN,
        _ => LAMBDA_FILTER_PATTERN,
    }
}

/// Whether log collection is wanted for the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCollectionSettings {
    pub collect_lambda_logs: bool,
}

impl Default for LogCollectionSettings {
    fn default() -> Self {
        Self {
            collect_lambda_logs: true,
        }
    }
}

impl LogCollectionSettings {
    /// Reads `enterprise.collectLambdaLogs` from the service's custom block.
    /// Only an explicit `false` disables collection.
    pub fn from_custom(custom: &Value) -> Self {
        let collect = custom
            .pointer("/enterprise/collectLambdaLogs")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Self {
            collect_lambda_logs: collect,
        }
    }
}

/// What the log destination is requested for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDestinationRequest {
    pub app_uid: Option<String>,
    pub tenant_uid: Option<String>,
    pub service_name: String,
    pub stage_name: String,
    pub region_name: String,
    pub account_id: String,
}

/// Looks up the platform's log destination.
pub trait LogDestinationProvider {
    /// Returns the destination ARN. Regions without log collection are
    /// reported as [`SafeguardsError::UnsupportedRegion`].
    fn destination_arn(&self, request: &LogDestinationRequest) -> Result<String>;
}

/// What [`wire_log_subscriptions`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCollection {
    /// The service opted out.
    Disabled,
    /// The template has no log groups.
    NoLogGroups,
    /// The region has no log destination.
    UnsupportedRegion,
    /// Names of the subscription filters added.
    Subscribed(Vec<String>),
}

fn is_unsupported_region(err: &SafeguardsError) -> bool {
    match err {
        SafeguardsError::UnsupportedRegion(_) => true,
        SafeguardsError::LogDestination(message) => message.contains("not supported in region"),
        _ => false,
    }
}

/// Adds a subscription filter for every log group in `template`.
pub fn wire_log_subscriptions<P>(
    template: &mut Value,
    settings: &LogCollectionSettings,
    request: &LogDestinationRequest,
    provider: &P,
) -> Result<LogCollection>
where
    P: LogDestinationProvider + ?Sized,
{
    if !settings.collect_lambda_logs {
        tracing::info!("Log collection is disabled for this service");
        return Ok(LogCollection::Disabled);
    }

    let log_groups: Vec<(String, &'static str)> = pick_resource_type(template, LOG_GROUP_TYPE)
        .into_iter()
        .map(|group| {
            let name = group.resource.pointer("/Properties/LogGroupName").and_then(Value::as_str);
            (group.key.to_string(), filter_pattern(name))
        })
        .collect();
    if log_groups.is_empty() {
        return Ok(LogCollection::NoLogGroups);
    }

    let destination_arn = match provider.destination_arn(request) {
        Ok(arn) => arn,
        Err(err) if is_unsupported_region(&err) => {
            tracing::warn!(
                region = %request.region_name,
                "Lambda log collection is not supported in {}",
                request.region_name
            );
            return Ok(LogCollection::UnsupportedRegion);
        }
        Err(err) => return Err(err),
    };

    let resources = template
        .as_object_mut()
        .ok_or_else(|| SafeguardsError::InvalidContext("stack template is not an object".into()))?
        .entry("Resources")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| SafeguardsError::InvalidContext("template Resources is not an object".into()))?;

    let mut added = Vec::with_capacity(log_groups.len());
    for (key, pattern) in log_groups {
        let name = format!("{}{}", SUBSCRIPTION_FILTER_PREFIX, upper_first(&key));
        resources.insert(
            name.clone(),
            json!({
                "Type": SUBSCRIPTION_FILTER_TYPE,
                "Properties": {
                    "DestinationArn": destination_arn,
                    "FilterPattern": pattern,
                    "LogGroupName": { "Ref": key }
                }
            }),
        );
        added.push(name);
    }

    tracing::info!(filters = added.len(), "Log subscriptions added");
    Ok(LogCollection::Subscribed(added))
}
