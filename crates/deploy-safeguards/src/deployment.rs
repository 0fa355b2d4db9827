//! Deployment data normalizer.
//!
//! Turns the framework's service declaration, the deployed stack's outputs
//! and version-control facts into the fixed deployment record the platform
//! stores.

use crate::decision::SafeguardResult;
use crate::error::{Result, SafeguardsError};
use crate::vcs::VcsInfo;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Declared output values with this prefix name a stack output to resolve.
pub const STACK_OUTPUT_PREFIX: &str = "CFN!?";

/// Stack output holding the role the platform reads logs with.
pub const LOGS_ROLE_OUTPUT: &str = "EnterpriseLogAccessIamRole";

const WEBSOCKET_SUFFIX: &str = "Websocket";

fn service_endpoint_regex() -> Option<&'static Regex> {
    static ENDPOINT: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    ENDPOINT
        .get_or_init(|| Regex::new(r"^ServiceEndpoint"))
        .as_ref()
        .ok()
}

/// A function as declared in the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default, alias = "memory")]
    pub memory_size: Option<u64>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub environment: Map<String, Value>,
    #[serde(default)]
    pub role: Option<Value>,
    #[serde(default)]
    pub on_error: Option<String>,
    #[serde(default)]
    pub aws_kms_key_arn: Option<String>,
    #[serde(default)]
    pub tags: Map<String, Value>,
    #[serde(default)]
    pub vpc: Option<Value>,
    #[serde(default)]
    pub layers: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
}

/// The parts of a service declaration the record is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeclaration {
    pub service: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub tenant_uid: Option<String>,
    #[serde(default)]
    pub app_uid: Option<String>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDeclaration>,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub layers: Option<Value>,
    #[serde(default)]
    pub plugins: Option<Value>,
    #[serde(default)]
    pub custom: Option<Value>,
}

/// Outcome of the deployment being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Success,
    Error,
}

/// Facts about the deployment that do not come from the declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInputs {
    pub stage: String,
    pub region: String,
    pub account_id: String,
    pub framework_version: String,
    #[serde(default = "plugin_version")]
    pub plugin_version: String,
    #[serde(default)]
    pub deployment_uid: Option<String>,
    #[serde(default)]
    pub serverless_file: Option<String>,
    #[serde(default)]
    pub serverless_file_name: Option<String>,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub safeguards: Vec<SafeguardResult>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

fn plugin_version() -> String {
    crate::VERSION.to_string()
}

/// One output of the deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackOutput {
    pub output_key: String,
    pub output_value: String,
}

/// The deployed stack, absent when the first deployment failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackDescription {
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
}

impl StackDescription {
    /// Value of the output named `key`.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.output_key == key)
            .map(|o| o.output_value.as_str())
    }

    fn endpoint(&self, websocket: bool) -> Option<&str> {
        let regex = service_endpoint_regex()?;
        self.outputs
            .iter()
            .find(|o| o.output_key.ends_with(WEBSOCKET_SUFFIX) == websocket && regex.is_match(&o.output_key))
            .map(|o| o.output_value.as_str())
    }

    /// Id of the REST API behind the service endpoint.
    pub fn rest_api_id(&self) -> Option<String> {
        self.endpoint(false).and_then(|url| api_id(url, "https://"))
    }

    /// Id of the websocket API behind the websocket endpoint.
    pub fn websocket_api_id(&self) -> Option<String> {
        self.endpoint(true).and_then(|url| api_id(url, "wss://"))
    }
}

fn api_id(url: &str, scheme: &str) -> Option<String> {
    let host = url.split(scheme).nth(1)?;
    host.split('.').next().map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsProviderInfo {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub aws: AwsProviderInfo,
}

/// Provider-specific settings of a deployed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSettings {
    pub handler: Option<String>,
    pub memory_size: Option<u64>,
    pub runtime: Option<String>,
    /// Names of the environment variables; values are never recorded.
    pub environment: Vec<String>,
    pub role: Option<Value>,
    pub on_error: Option<String>,
    pub aws_kms_key_arn: Option<String>,
    pub tags: Map<String, Value>,
    pub vpc: Value,
    pub layers: Vec<Value>,
    pub name: String,
}

/// A deployed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRecord {
    pub name: String,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub arn: String,
    pub custom: FunctionSettings,
}

/// An event source wired to a deployed function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// The normalized deployment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serverless_file_name: Option<String>,
    pub version_framework: String,
    pub version_enterprise_plugin: String,
    pub tenant_uid: Option<String>,
    pub app_uid: Option<String>,
    pub tenant_name: Option<String>,
    pub app_name: Option<String>,
    pub service_name: String,
    pub stage_name: String,
    pub region_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_role_arn: Option<String>,
    pub archived: bool,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safeguards: Option<Vec<SafeguardResult>>,
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsInfo>,
    #[serde(default)]
    pub functions: Vec<FunctionRecord>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionRecord>,
}

impl DeploymentRecord {
    /// The record as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Builds the deployment record.
///
/// `stack` is `None` when the stack does not exist yet (first deployment
/// failed). Archived deployments get a reduced record and ignore `stack`
/// and `vcs`.
pub fn parse_deployment(
    declaration: &ServiceDeclaration,
    inputs: &DeploymentInputs,
    stack: Option<&StackDescription>,
    vcs: &VcsInfo,
) -> Result<DeploymentRecord> {
    if declaration.service.trim().is_empty() {
        return Err(SafeguardsError::MissingField("service".to_string()));
    }

    let mut record = DeploymentRecord {
        serverless_file: None,
        serverless_file_name: None,
        version_framework: inputs.framework_version.clone(),
        version_enterprise_plugin: inputs.plugin_version.clone(),
        tenant_uid: declaration.tenant_uid.clone(),
        app_uid: declaration.app_uid.clone(),
        tenant_name: declaration.tenant.clone(),
        app_name: declaration.app.clone(),
        service_name: declaration.service.clone(),
        stage_name: inputs.stage.clone(),
        region_name: inputs.region.clone(),
        deployment_uid: None,
        logs_role_arn: None,
        archived: inputs.archived,
        status: inputs.status,
        provider: None,
        layers: None,
        plugins: None,
        custom: None,
        safeguards: None,
        secrets: inputs.secrets.clone(),
        outputs: None,
        error: inputs.error.clone(),
        vcs: None,
        functions: Vec::new(),
        subscriptions: Vec::new(),
    };

    if inputs.archived {
        tracing::debug!(service = %declaration.service, "Recording archived deployment");
        return Ok(record);
    }

    record.serverless_file = inputs.serverless_file.clone();
    record.serverless_file_name = inputs.serverless_file_name.clone();
    record.deployment_uid = inputs.deployment_uid.clone();
    record.logs_role_arn = stack
        .and_then(|s| s.output(LOGS_ROLE_OUTPUT))
        .map(str::to_string);
    record.provider = Some(ProviderInfo {
        kind: "aws".to_string(),
        aws: AwsProviderInfo {
            account_id: inputs.account_id.clone(),
        },
    });
    record.layers = Some(
        declaration
            .layers
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    record.plugins = Some(plugin_list(declaration.plugins.as_ref()));
    record.custom = Some(
        declaration
            .custom
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    record.safeguards = Some(inputs.safeguards.clone());
    record.outputs = Some(resolve_outputs(&declaration.outputs, stack));
    record.vcs = Some(vcs.clone());

    for (key, function) in &declaration.functions {
        let deployed_name = function
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-{}", declaration.service, inputs.stage, key));

        record
            .functions
            .push(function_record(key, function, &deployed_name, inputs));

        for event in &function.events {
            match subscription_record(event, &deployed_name, stack) {
                Some(subscription) => record.subscriptions.push(subscription),
                None => tracing::warn!(function = %deployed_name, "Skipping event without a type"),
            }
        }
    }

    tracing::info!(
        service = %record.service_name,
        stage = %record.stage_name,
        functions = record.functions.len(),
        subscriptions = record.subscriptions.len(),
        "Deployment record built"
    );
    Ok(record)
}

fn plugin_list(plugins: Option<&Value>) -> Value {
    match plugins {
        None | Some(Value::Null) => Value::Array(Vec::new()),
        Some(value) => match value.get("modules") {
            Some(modules) if !modules.is_null() => modules.clone(),
            _ => value.clone(),
        },
    }
}

fn resolve_outputs(declared: &Map<String, Value>, stack: Option<&StackDescription>) -> Map<String, Value> {
    let mut outputs = Map::new();
    for (key, value) in declared {
        let reference = value.as_str().and_then(|s| s.strip_prefix(STACK_OUTPUT_PREFIX));
        match (reference, stack) {
            (None, _) => {
                outputs.insert(key.clone(), value.clone());
            }
            (Some(name), Some(stack)) => match stack.output(name) {
                Some(resolved) => {
                    outputs.insert(key.clone(), Value::String(resolved.to_string()));
                }
                None => tracing::warn!(output = %key, stack_output = %name, "Stack output not found"),
            },
            (Some(_), None) => {}
        }
    }
    outputs
}

fn function_record(
    key: &str,
    function: &FunctionDeclaration,
    deployed_name: &str,
    inputs: &DeploymentInputs,
) -> FunctionRecord {
    FunctionRecord {
        name: deployed_name.to_string(),
        description: function.description.clone(),
        timeout: function.timeout,
        kind: "awsLambda".to_string(),
        arn: format!(
            "arn:aws:lambda:{}:{}:function:{}",
            inputs.region, inputs.account_id, deployed_name
        ),
        custom: FunctionSettings {
            handler: function.handler.clone(),
            memory_size: function.memory_size,
            runtime: function.runtime.clone(),
            environment: function.environment.keys().cloned().collect(),
            role: function.role.clone(),
            on_error: function.on_error.clone(),
            aws_kms_key_arn: function.aws_kms_key_arn.clone(),
            tags: function.tags.clone(),
            vpc: function
                .vpc
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
            layers: function.layers.clone(),
            name: function.name.clone().unwrap_or_else(|| key.to_string()),
        },
    }
}

fn subscription_record(
    event: &Value,
    function: &str,
    stack: Option<&StackDescription>,
) -> Option<SubscriptionRecord> {
    let mut details = Map::new();

    let kind = match event {
        Value::String(kind) => kind.clone(),
        Value::Object(map) => {
            let (kind, settings) = map.iter().next()?;
            match (kind.as_str(), settings) {
                ("http", Value::String(route)) => {
                    let mut parts = route.split(' ');
                    if let Some(method) = parts.next() {
                        details.insert("method".into(), Value::String(method.to_string()));
                    }
                    if let Some(path) = parts.next() {
                        details.insert("path".into(), Value::String(path.to_string()));
                    }
                }
                ("http", Value::Object(http)) => {
                    for field in ["path", "method", "cors", "integration"] {
                        if let Some(value) = http.get(field) {
                            details.insert(field.to_string(), value.clone());
                        }
                    }
                }
                (_, Value::Object(fields)) => {
                    details.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                (kind, value) => {
                    details.insert(kind.to_string(), value.clone());
                }
            }

            if let Some(stack) = stack {
                let api_id = match kind.as_str() {
                    "http" => stack.rest_api_id().map(|id| ("restApiId", id)),
                    "websocket" => stack.websocket_api_id().map(|id| ("websocketApiId", id)),
                    _ => None,
                };
                if let Some((field, id)) = api_id {
                    details.insert(field.to_string(), Value::String(id));
                }
            }
            kind.clone()
        }
        _ => return None,
    };

    Some(SubscriptionRecord {
        kind,
        function: function.to_string(),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::VcsKind;
    use serde_json::json;

    fn declaration() -> ServiceDeclaration {
        serde_json::from_value(json!({
            "service": "orders",
            "tenant": "acme",
            "app": "shop",
            "tenantUid": "T1",
            "appUid": "A1",
            "plugins": { "modules": ["serverless-offline"] },
            "outputs": {
                "tableName": "orders-dev",
                "apiUrl": "CFN!?ServiceEndpoint",
                "missing": "CFN!?NoSuchOutput"
            },
            "functions": {
                "create": {
                    "handler": "handler.create",
                    "memorySize": 512,
                    "runtime": "nodejs12.x",
                    "environment": { "TABLE": "orders", "SECRET": "s3cr3t" },
                    "events": [
                        { "http": "POST orders" },
                        { "websocket": { "route": "$connect" } },
                        "alexaSkill",
                        { "schedule": "rate(5 minutes)" }
                    ]
                },
                "list": {
                    "name": "orders-list",
                    "handler": "handler.list",
                    "events": [
                        { "http": { "path": "orders", "method": "get", "cors": true } }
                    ]
                }
            }
        }))
        .unwrap()
    }

    fn inputs() -> DeploymentInputs {
        DeploymentInputs {
            stage: "dev".into(),
            region: "us-east-1".into(),
            account_id: "123456789012".into(),
            framework_version: "1.60.0".into(),
            plugin_version: "3.2.0".into(),
            deployment_uid: Some("dep-1".into()),
            secrets: vec!["stripe".into()],
            ..DeploymentInputs::default()
        }
    }

    fn stack() -> StackDescription {
        serde_json::from_value(json!({
            "Outputs": [
                { "OutputKey": "EnterpriseLogAccessIamRole", "OutputValue": "arn:aws:iam::123:role/logs" },
                { "OutputKey": "ServiceEndpoint", "OutputValue": "https://abc123.execute-api.us-east-1.amazonaws.com/dev" },
                { "OutputKey": "ServiceEndpointWebsocket", "OutputValue": "wss://ws987.execute-api.us-east-1.amazonaws.com/dev" }
            ]
        }))
        .unwrap()
    }

    fn git() -> VcsInfo {
        VcsInfo {
            kind: Some(VcsKind::Git),
            branch: Some("main".into()),
            ..VcsInfo::default()
        }
    }

    #[test]
    fn test_functions_and_arns() {
        let record = parse_deployment(&declaration(), &inputs(), Some(&stack()), &git()).unwrap();
        assert_eq!(record.functions.len(), 2);

        let create = &record.functions[0];
        assert_eq!(create.name, "orders-dev-create");
        assert_eq!(
            create.arn,
            "arn:aws:lambda:us-east-1:123456789012:function:orders-dev-create"
        );
        assert_eq!(create.kind, "awsLambda");
        assert_eq!(create.custom.memory_size, Some(512));
        assert_eq!(create.custom.environment, vec!["SECRET", "TABLE"]);
        assert_eq!(create.custom.name, "create");

        let list = &record.functions[1];
        assert_eq!(list.name, "orders-list");
        assert_eq!(list.custom.name, "orders-list");
    }

    #[test]
    fn test_subscriptions() {
        let record = parse_deployment(&declaration(), &inputs(), Some(&stack()), &git()).unwrap();
        let subs: Vec<Value> = record
            .subscriptions
            .iter()
            .map(|s| serde_json::to_value(s).unwrap())
            .collect();

        assert_eq!(
            subs[0],
            json!({ "type": "http", "function": "orders-dev-create", "method": "POST", "path": "orders", "restApiId": "abc123" })
        );
        assert_eq!(
            subs[1],
            json!({ "type": "websocket", "function": "orders-dev-create", "route": "$connect", "websocketApiId": "ws987" })
        );
        assert_eq!(subs[2], json!({ "type": "alexaSkill", "function": "orders-dev-create" }));
        assert_eq!(
            subs[3],
            json!({ "type": "schedule", "function": "orders-dev-create", "schedule": "rate(5 minutes)" })
        );
        assert_eq!(
            subs[4],
            json!({ "type": "http", "function": "orders-list", "path": "orders", "method": "get", "cors": true, "restApiId": "abc123" })
        );
    }

    #[test]
    fn test_outputs_and_logs_role() {
        let record = parse_deployment(&declaration(), &inputs(), Some(&stack()), &git()).unwrap();
        assert_eq!(record.logs_role_arn.as_deref(), Some("arn:aws:iam::123:role/logs"));

        let outputs = record.outputs.unwrap();
        assert_eq!(outputs["tableName"], "orders-dev");
        assert_eq!(
            outputs["apiUrl"],
            "https://abc123.execute-api.us-east-1.amazonaws.com/dev"
        );
        assert!(!outputs.contains_key("missing"));
        assert_eq!(record.plugins, Some(json!(["serverless-offline"])));
    }

    #[test]
    fn test_without_stack() {
        let record = parse_deployment(&declaration(), &inputs(), None, &VcsInfo::none()).unwrap();
        assert_eq!(record.logs_role_arn, None);

        let outputs = record.outputs.as_ref().unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs.contains_key("tableName"));

        let http = serde_json::to_value(&record.subscriptions[0]).unwrap();
        assert!(http.get("restApiId").is_none());

        let value = record.to_value().unwrap();
        assert_eq!(value["vcs"], json!({ "type": null }));
        assert_eq!(value["provider"], json!({ "type": "aws", "aws": { "accountId": "123456789012" } }));
    }

    #[test]
    fn test_archived_record() {
        let archived = DeploymentInputs {
            archived: true,
            ..inputs()
        };
        let record = parse_deployment(&declaration(), &archived, Some(&stack()), &git()).unwrap();
        assert!(record.archived);
        assert!(record.functions.is_empty());
        assert!(record.subscriptions.is_empty());

        let value = record.to_value().unwrap();
        assert!(value.get("vcs").is_none());
        assert!(value.get("outputs").is_none());
        assert!(value.get("logsRoleArn").is_none());
        assert_eq!(value["serviceName"], "orders");
        assert_eq!(value["secrets"], json!(["stripe"]));
        assert_eq!(value["status"], "success");
    }

    #[test]
    fn test_missing_service_name() {
        let decl = ServiceDeclaration::default();
        let err = parse_deployment(&decl, &inputs(), None, &VcsInfo::none()).unwrap_err();
        assert!(matches!(err, SafeguardsError::MissingField(_)));
    }
}
