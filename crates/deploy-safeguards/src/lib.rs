//! Deploy Safeguards
//!
//! Policy evaluation for deployment safeguards, plus the deployment data
//! the platform records about each deployment.
//!
//! A safeguard policy is a rule specification: rules joined by `&&`, each
//! either a structured query wrapped as `jsonata("...")` or a boolean
//! expression over the deployment context. Every rule is evaluated against
//! the same immutable snapshot and the outcomes reduce to one verdict.
//!
//! ```
//! use deploy_safeguards::prelude::*;
//! use serde_json::json;
//!
//! let context = DeploymentContext::from_declaration(json!({
//!     "provider": { "stage": "dev" }
//! }));
//! let verdict = evaluate_policy(&context, "jsonata(\"declaration.provider[stage='dev']\")");
//! assert!(verdict.is_approved());
//! ```
//!
//! The crate also normalizes deployment metadata into the platform's record
//! schema and wires log-forwarding subscriptions into stack templates.
//! Cloud APIs and version control are reached through traits the caller
//! implements.

pub mod context;
pub mod decision;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
mod lexer;
pub mod logs;
pub mod parser;
pub mod policy;
pub mod query;
pub mod rules;
pub mod runner;
pub mod types;
pub mod vcs;

#[cfg(feature = "wasm")]
pub mod wasm;

#[cfg(test)]
mod proptest;

pub use context::DeploymentContext;
pub use decision::{SafeguardResult, SafeguardsReport, Verdict};
pub use deployment::{parse_deployment, DeploymentRecord};
pub use engine::{evaluate_policy, run_javascript_policy, PolicySignals};
pub use error::{EvalError, Result, SafeguardsError};
pub use policy::SafeguardPolicy;
pub use runner::SafeguardsRunner;

/// Version of the safeguards engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::context::DeploymentContext;
    pub use crate::decision::{SafeguardResult, SafeguardsReport, Verdict};
    pub use crate::engine::{evaluate_policy, run_javascript_policy, PolicySignals};
    pub use crate::error::{EvalError, Result, SafeguardsError};
    pub use crate::parser::SafeguardsConfig;
    pub use crate::policy::SafeguardPolicy;
    pub use crate::runner::SafeguardsRunner;
    pub use crate::types::*;
}
