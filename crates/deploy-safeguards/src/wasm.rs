//! WASM bindings so the plugin host can run safeguards.

#![cfg(feature = "wasm")]

use crate::context::DeploymentContext;
use crate::engine::{self, PolicySignals};
use crate::runner::SafeguardsRunner;
use js_sys::Function;
use wasm_bindgen::prelude::*;

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn parse_context(context_json: &str) -> Result<DeploymentContext, JsValue> {
    DeploymentContext::from_json(context_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid context: {}", e)))
}

/// WASM-compatible safeguards runner.
#[wasm_bindgen]
pub struct WasmSafeguards {
    runner: SafeguardsRunner,
}

#[wasm_bindgen]
impl WasmSafeguards {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            runner: SafeguardsRunner::new(),
        }
    }

    /// Loads policies from a YAML or JSON configuration.
    #[wasm_bindgen]
    pub fn load_config(&mut self, config: &str) -> Result<(), JsValue> {
        self.runner.load_config(config).map_err(js_error)
    }

    /// Returns the number of loaded policies.
    #[wasm_bindgen]
    pub fn policy_count(&self) -> usize {
        self.runner.policy_count()
    }

    /// Runs every loaded policy. Returns the report as a JSON string.
    #[wasm_bindgen]
    pub fn run(&self, context_json: &str) -> Result<String, JsValue> {
        let context = parse_context(context_json)?;
        let report = self.runner.run(&context);
        serde_json::to_string(&report).map_err(js_error)
    }
}

impl Default for WasmSafeguards {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates a rule specification. Returns the verdict as a JSON string.
#[wasm_bindgen]
pub fn evaluate(context_json: &str, rule_spec: &str) -> Result<String, JsValue> {
    let context = parse_context(context_json)?;
    let verdict = engine::evaluate_policy(&context, rule_spec);
    serde_json::to_string(&verdict).map_err(js_error)
}

struct JsSignals<'a> {
    approve: &'a Function,
    fail: &'a Function,
    error: Option<JsValue>,
}

impl PolicySignals for JsSignals<'_> {
    fn approve(&mut self) {
        if let Err(err) = self.approve.call0(&JsValue::NULL) {
            self.error = Some(err);
        }
    }

    fn fail(&mut self, reason: &str) {
        if let Err(err) = self.fail.call1(&JsValue::NULL, &JsValue::from_str(reason)) {
            self.error = Some(err);
        }
    }
}

/// Runs the javascript safeguard, calling `approve()` or `fail(reason)`.
///
/// `options` is the JSON-encoded rule specification.
#[wasm_bindgen]
pub fn run_javascript_policy(
    context_json: &str,
    options: &str,
    approve: &Function,
    fail: &Function,
) -> Result<(), JsValue> {
    let context = parse_context(context_json)?;
    let mut signals = JsSignals {
        approve,
        fail,
        error: None,
    };
    engine::run_javascript_policy(&mut signals, &context, options);
    match signals.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Logs a message to the console (for debugging).
#[wasm_bindgen]
pub fn log(message: &str) {
    web_sys::console::log_1(&JsValue::from_str(message));
}

/// Returns the version of the safeguards engine.
#[wasm_bindgen]
pub fn version() -> String {
    crate::VERSION.to_string()
}
