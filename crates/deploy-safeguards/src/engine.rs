//! The javascript safeguard: evaluates a rule specification against a
//! deployment context and reduces the rule outcomes to one verdict.

use crate::context::DeploymentContext;
use crate::decision::Verdict;
use crate::error::{EvalError, ExpressionError};
use crate::evaluator;
use crate::rules;

/// Signals a safeguard policy reports its outcome through.
pub trait PolicySignals {
    /// The deployment complies with the policy.
    fn approve(&mut self);

    /// The deployment does not comply, or the policy could not be evaluated.
    fn fail(&mut self, reason: &str);
}

/// Evaluates every rule of `rule_spec` against `context`.
///
/// - No rules: approved.
/// - A rule that cannot be parsed or evaluated stops evaluation and fails
///   with a message naming that rule.
/// - Otherwise all rules are evaluated; if any is false the policy fails
///   with [`crate::decision::NONCOMPLIANT_MESSAGE`].
pub fn evaluate_policy(context: &DeploymentContext, rule_spec: &str) -> Verdict {
    let rules = rules::split(rule_spec);
    if rules.is_empty() {
        tracing::debug!("No rules configured, approving");
        return Verdict::Approved;
    }

    let mut noncompliant = 0usize;
    for rule in &rules {
        match evaluator::evaluate(rule, context) {
            Ok(true) => {}
            Ok(false) => noncompliant += 1,
            Err(err) => {
                tracing::info!(rule = %rule, error = %err.source, "Policy statement is invalid");
                return Verdict::Failed(err.to_string());
            }
        }
    }

    if noncompliant > 0 {
        tracing::info!(rules = rules.len(), noncompliant, "Policy failed");
        Verdict::noncompliant()
    } else {
        tracing::info!(rules = rules.len(), "Policy approved");
        Verdict::Approved
    }
}

/// Runs the javascript safeguard with its JSON-encoded rule specification and
/// reports through `signals`. Exactly one signal is raised, exactly once.
pub fn run_javascript_policy<S>(signals: &mut S, context: &DeploymentContext, options: &str)
where
    S: PolicySignals + ?Sized,
{
    let verdict = match decode_options(options) {
        Ok(rule_spec) => evaluate_policy(context, &rule_spec),
        Err(err) => Verdict::Failed(err.to_string()),
    };
    signal(signals, &verdict);
}

/// Raises the signal matching `verdict`.
pub fn signal<S>(signals: &mut S, verdict: &Verdict)
where
    S: PolicySignals + ?Sized,
{
    match verdict {
        Verdict::Approved => signals.approve(),
        Verdict::Failed(reason) => signals.fail(reason),
    }
}

/// Decodes the JSON string the configuration transport wraps the rule
/// specification in.
pub fn decode_options(options: &str) -> Result<String, EvalError> {
    serde_json::from_str::<String>(options).map_err(|err| {
        EvalError::new(
            options,
            ExpressionError::syntax(err.column().saturating_sub(1), err.to_string()),
        )
    })
}

/// Signals recorded in memory, handy for callers that want the verdict back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedSignals {
    pub approvals: usize,
    pub failures: Vec<String>,
}

impl RecordedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// The verdict the signals describe, if exactly one was raised.
    pub fn verdict(&self) -> Option<Verdict> {
        match (self.approvals, self.failures.as_slice()) {
            (1, []) => Some(Verdict::Approved),
            (0, [reason]) => Some(Verdict::Failed(reason.clone())),
            _ => None,
        }
    }
}

impl PolicySignals for RecordedSignals {
    fn approve(&mut self) {
        self.approvals += 1;
    }

    fn fail(&mut self, reason: &str) {
        self.failures.push(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::NONCOMPLIANT_MESSAGE;
    use serde_json::json;

    fn service_data() -> DeploymentContext {
        DeploymentContext::from_declaration(json!({ "provider": { "stage": "dev" } }))
    }

    fn run(rules: &str) -> RecordedSignals {
        let mut policy = RecordedSignals::new();
        let options = serde_json::to_string(rules).unwrap();
        run_javascript_policy(&mut policy, &service_data(), &options);
        policy
    }

    #[test]
    fn test_allows_matching_query() {
        let policy = run("jsonata(\"declaration.provider[stage='dev']\")");
        assert_eq!(policy.approvals, 1);
        assert!(policy.failures.is_empty());
    }

    #[test]
    fn test_allows_membership_query() {
        let policy = run("jsonata(\"declaration.provider[stage in ['dev','stage']]\")");
        assert_eq!(policy.approvals, 1);
        assert!(policy.failures.is_empty());
    }

    #[test]
    fn test_requires_all_queries_to_pass() {
        let policy = run(
            "jsonata(\"declaration.provider[stage='dev']\")\n      &&\n       jsonata(\"declaration.provider[stage='prod']\")",
        );
        assert_eq!(policy.approvals, 0);
        assert_eq!(policy.failures, vec![NONCOMPLIANT_MESSAGE.to_string()]);
    }

    #[test]
    fn test_forbids_non_matching_query() {
        let policy = run("jsonata(\"declaration.provider[stage='prod']\")");
        assert_eq!(policy.approvals, 0);
        assert_eq!(policy.failures, vec![NONCOMPLIANT_MESSAGE.to_string()]);
    }

    #[test]
    fn test_forbids_invalid_queries() {
        let policy = run("this is not a valid query");
        assert_eq!(policy.approvals, 0);
        assert_eq!(
            policy.failures,
            vec!["Error in the policy statement: \"this is not a valid query\"".to_string()]
        );
    }

    #[test]
    fn test_allows_plain_expressions() {
        assert_eq!(run("5==5").verdict(), Some(Verdict::Approved));
        assert_eq!(
            run("declaration.provider.stage == \"dev\"").verdict(),
            Some(Verdict::Approved)
        );
        assert_eq!(
            run("declaration.provider.stage == \"prod\"").verdict(),
            Some(Verdict::noncompliant())
        );
    }

    #[test]
    fn test_multi_line_spec_with_comments() {
        let policy = run(r#"

// These rules are examples of rules you can implement with this safeguard.

// Stage must be "dev", you can user the jsonata()
jsonata("declaration.provider[stage='dev']") // using jsonata
// declaration.provider.stage=='dev' // using plain JS

// Region must be us-east-1 or us-east-2
// jsonata("declaration.provider[region in ['us-east-1', 'us-east-2']]")
"#);
        assert_eq!(policy.approvals, 1);
        assert!(policy.failures.is_empty());
    }

    #[test]
    fn test_no_rules_is_approved() {
        assert_eq!(evaluate_policy(&service_data(), ""), Verdict::Approved);
        assert_eq!(
            evaluate_policy(&service_data(), "\n// nothing enforced yet\n"),
            Verdict::Approved
        );
    }

    #[test]
    fn test_invalid_rule_takes_precedence_over_false_rule() {
        let verdict = evaluate_policy(
            &service_data(),
            "declaration.provider.stage == 'prod' && this is not a valid query",
        );
        assert_eq!(
            verdict,
            Verdict::Failed("Error in the policy statement: \"this is not a valid query\"".into())
        );
    }

    #[test]
    fn test_invalid_rule_stops_evaluation() {
        let verdict = evaluate_policy(
            &service_data(),
            "missing.binding == 1 && this is not a valid query",
        );
        assert_eq!(
            verdict,
            Verdict::Failed("Error in the policy statement: \"missing.binding == 1\"".into())
        );
    }

    #[test]
    fn test_options_must_be_a_json_string() {
        let mut policy = RecordedSignals::new();
        run_javascript_policy(&mut policy, &service_data(), "5==5");
        assert_eq!(policy.approvals, 0);
        assert_eq!(
            policy.failures,
            vec!["Error in the policy statement: \"5==5\"".to_string()]
        );
    }

    #[test]
    fn test_signals_through_trait_object() {
        let mut recorded = RecordedSignals::new();
        let signals: &mut dyn PolicySignals = &mut recorded;
        run_javascript_policy(signals, &service_data(), "\"1 < 2\"");
        assert_eq!(recorded.verdict(), Some(Verdict::Approved));
    }

    #[test]
    fn test_deeply_nested_rules_fail_as_statement_errors() {
        let deep = [
            format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000)),
            format!("{}true", "!".repeat(50_000)),
            format!(
                "jsonata(\"declaration.provider[{}stage='dev'{}]\")",
                "(".repeat(5_000),
                ")".repeat(5_000)
            ),
        ];
        for rule in deep {
            let verdict = evaluate_policy(&service_data(), &rule);
            assert_eq!(
                verdict,
                Verdict::Failed(format!("Error in the policy statement: \"{}\"", rule))
            );
        }

        let shallow = format!(
            "{}declaration.provider.stage == 'dev'{}",
            "(".repeat(20),
            ")".repeat(20)
        );
        assert_eq!(evaluate_policy(&service_data(), &shallow), Verdict::Approved);
    }

    #[test]
    fn test_query_equality_against_a_list() {
        let context = DeploymentContext::from_declaration(json!({
            "provider": { "stage": "dev", "tags": ["a", "b"] }
        }));
        assert_eq!(
            evaluate_policy(&context, "jsonata(\"declaration.provider[tags='zzz']\")"),
            Verdict::noncompliant()
        );
        assert_eq!(
            evaluate_policy(&context, "jsonata(\"declaration.provider[tags!='zzz']\")"),
            Verdict::Approved
        );
    }
}
