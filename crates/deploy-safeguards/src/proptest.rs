//! Property-based tests for rule splitting and policy evaluation.
//!
//! These tests use proptest to verify invariants around:
//! - Lossless, order-preserving rule splitting
//! - Reduction of rule outcomes to one verdict
//! - Error attribution to the first broken rule

use crate::context::DeploymentContext;
use crate::decision::{Verdict, NONCOMPLIANT_MESSAGE};
use crate::engine::{self, RecordedSignals};
use crate::rules;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Strategies
// ============================================================================

/// Text that may hold the combinator and comment markers, safe inside quotes.
fn arb_quoted_word() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9 &|/-]{0,12}").unwrap()
}

/// A single rule expression without a top-level `&&`.
fn arb_rule() -> impl Strategy<Value = String> {
    prop_oneof![
        arb_quoted_word().prop_map(|w| format!("declaration.provider.stage == '{}'", w)),
        arb_quoted_word().prop_map(|w| format!("declaration.provider.stage != \"{}\"", w)),
        arb_quoted_word().prop_map(|w| format!("jsonata(\"declaration.provider[stage='{}']\")", w)),
        (0i64..1000, 0i64..1000).prop_map(|(a, b)| format!("{} < {}", a, b)),
        (0i64..10).prop_map(|n| format!("[1, 2, 3].includes({})", n)),
        (0i64..10).prop_map(|n| format!("(declaration.count > {} && true) || false", n)),
    ]
}

/// What goes between two rules.
fn arb_joiner() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("&&"),
        Just(" && "),
        Just("\n&&\n"),
        Just("\n      &&\n       "),
        Just("\n// disabled && rule\n&& "),
        Just(" &&\n\n# note\n"),
    ]
}

fn arb_rule_spec() -> impl Strategy<Value = (Vec<String>, String)> {
    prop::collection::vec((arb_rule(), arb_joiner()), 1..6).prop_map(|parts| {
        let rules: Vec<String> = parts.iter().map(|(rule, _)| rule.clone()).collect();
        let mut spec = String::new();
        for (i, (rule, joiner)) in parts.iter().enumerate() {
            if i > 0 {
                spec.push_str(joiner);
            }
            spec.push_str(rule);
        }
        (rules, spec)
    })
}

fn context() -> DeploymentContext {
    DeploymentContext::from_declaration(json!({
        "provider": { "stage": "dev", "region": "us-east-1" },
        "count": 3
    }))
}

fn literal(holds: bool) -> &'static str {
    if holds {
        "1 == 1"
    } else {
        "1 == 2"
    }
}

// ============================================================================
// Rule splitting
// ============================================================================

proptest! {
    /// Rules joined by the combinator come back unchanged and in order.
    #[test]
    fn split_is_lossless((rules, spec) in arb_rule_spec()) {
        prop_assert_eq!(rules::split(&spec), rules);
    }

    /// Surrounding blank lines and comment lines never add rules.
    #[test]
    fn split_ignores_surrounding_comments((rules, spec) in arb_rule_spec()) {
        let padded = format!("\n// header\n\n{}\n\n# trailer\n", spec);
        prop_assert_eq!(rules::split(&padded), rules);
    }

    /// Every piece is trimmed and non-empty.
    #[test]
    fn split_pieces_are_trimmed(spec in "[a-z =&'\n]{0,40}") {
        for piece in rules::split(&spec) {
            prop_assert!(!piece.is_empty());
            prop_assert_eq!(piece.trim(), piece.as_str());
        }
    }
}

// ============================================================================
// Policy evaluation
// ============================================================================

proptest! {
    /// A policy approves exactly when every rule holds.
    #[test]
    fn verdict_reduces_rule_outcomes(outcomes in prop::collection::vec(any::<bool>(), 1..8)) {
        let spec = outcomes.iter().map(|&o| literal(o)).collect::<Vec<_>>().join(" &&\n");
        let verdict = engine::evaluate_policy(&context(), &spec);

        if outcomes.iter().all(|&o| o) {
            prop_assert_eq!(verdict, Verdict::Approved);
        } else {
            prop_assert_eq!(verdict, Verdict::Failed(NONCOMPLIANT_MESSAGE.to_string()));
        }
    }

    /// The first broken rule is named, whatever the other rules do.
    #[test]
    fn broken_rule_is_attributed(
        before in prop::collection::vec(any::<bool>(), 0..5),
        after in prop::collection::vec(any::<bool>(), 0..5),
        n in 0u32..100,
    ) {
        let broken = format!("nonsense rule {}", n);
        let mut parts: Vec<String> = before.iter().map(|&o| literal(o).to_string()).collect();
        parts.push(broken.clone());
        parts.extend(after.iter().map(|&o| literal(o).to_string()));

        let verdict = engine::evaluate_policy(&context(), &parts.join(" && "));
        prop_assert_eq!(
            verdict,
            Verdict::Failed(format!("Error in the policy statement: \"{}\"", broken))
        );
    }

    /// Exactly one signal is raised per invocation.
    #[test]
    fn one_signal_per_run((_, spec) in arb_rule_spec()) {
        let mut signals = RecordedSignals::new();
        let options = serde_json::to_string(&spec).unwrap();
        engine::run_javascript_policy(&mut signals, &context(), &options);
        prop_assert_eq!(signals.approvals + signals.failures.len(), 1);
    }

    /// A stage filter query matches exactly the configured stage.
    #[test]
    fn stage_query_matches_only_its_stage(stage in "[a-z]{1,8}") {
        let rule = format!("jsonata(\"declaration.provider[stage='{}']\")", stage);
        let verdict = engine::evaluate_policy(&context(), &rule);
        prop_assert_eq!(verdict.is_approved(), stage == "dev");
    }
}
