//! Structured query sublanguage.
//!
//! A small path/filter language over the deployment context, compatible with
//! the subset of JSONata used in safeguard rules:
//!
//! - field access: `declaration.provider.stage`, `` `odd name` ``, `$`, `$$`
//! - filters: `declaration.provider[stage='dev']`, `functions[0]`
//! - comparisons: `=`, `!=`, `<`, `<=`, `>`, `>=`
//! - membership: `stage in ['dev', 'staging']`
//! - boolean connectives: `and`, `or`
//!
//! Paths evaluate to sequences. Arrays met while walking a path are
//! flattened and missing fields contribute nothing, so a query "matches"
//! when its result sequence is non-empty.

use crate::error::ExpressionError;
use crate::lexer::{TokenKind, TokenStream};
use serde_json::Value;
use std::borrow::Cow;

type QueryResult<T> = std::result::Result<T, ExpressionError>;

/// A parsed query, reusable across contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    root: QueryExpr,
}

#[derive(Debug, Clone, PartialEq)]
enum QueryExpr {
    Path(Vec<Step>),
    Literal(Value),
    Array(Vec<QueryExpr>),
    Compare(Box<QueryExpr>, CompareOp, Box<QueryExpr>),
    In(Box<QueryExpr>, Box<QueryExpr>),
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    target: StepTarget,
    filters: Vec<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq)]
enum StepTarget {
    Field(String),
    /// `$`: the item currently in scope.
    Current,
    /// `$$`: the document root.
    Root,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Order(OrderOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Query {
    /// Parses query text.
    pub fn parse(text: &str) -> QueryResult<Self> {
        let mut tokens = TokenStream::new(text)?;
        if *tokens.peek() == TokenKind::Eof {
            return Err(ExpressionError::Empty);
        }
        let root = Parser { tokens: &mut tokens }.or_expr()?;
        tokens.expect_eof()?;
        Ok(Self { root })
    }

    /// Evaluates the query and returns the result sequence.
    pub fn evaluate(&self, document: &Value) -> QueryResult<Vec<Value>> {
        let scope = Scope {
            current: document,
            root: document,
        };
        Ok(eval(&self.root, scope)?
            .into_iter()
            .map(Cow::into_owned)
            .collect())
    }

    /// Returns true when the query selects anything.
    ///
    /// A query whose whole result is the single boolean `false` (for example a
    /// top-level comparison) does not match.
    pub fn matches(&self, document: &Value) -> QueryResult<bool> {
        let scope = Scope {
            current: document,
            root: document,
        };
        let result = eval(&self.root, scope)?;
        Ok(match result.as_slice() {
            [] => false,
            [single] => !matches!(single.as_ref(), Value::Bool(false)),
            _ => true,
        })
    }
}

/// Parses and runs `text` against `document` in one go.
pub fn matches(text: &str, document: &Value) -> QueryResult<bool> {
    Query::parse(text)?.matches(document)
}

struct Parser<'t> {
    tokens: &'t mut TokenStream,
}

impl Parser<'_> {
    // Brackets, parentheses and connective chains each count one level
    // against the nesting limit.

    fn or_expr(&mut self) -> QueryResult<QueryExpr> {
        let depth = self.tokens.depth();
        self.tokens.enter()?;
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            self.tokens.enter()?;
            let right = self.and_expr()?;
            left = QueryExpr::Or(Box::new(left), Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn and_expr(&mut self) -> QueryResult<QueryExpr> {
        let depth = self.tokens.depth();
        let mut left = self.comparison()?;
        while self.eat_keyword("and") {
            self.tokens.enter()?;
            let right = self.comparison()?;
            left = QueryExpr::And(Box::new(left), Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn comparison(&mut self) -> QueryResult<QueryExpr> {
        let left = self.operand()?;
        if self.eat_keyword("in") {
            let right = self.operand()?;
            return Ok(QueryExpr::In(Box::new(left), Box::new(right)));
        }
        let op = match self.tokens.peek() {
            TokenKind::Assign => CompareOp::Eq,
            TokenKind::NotEq => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Order(OrderOp::Lt),
            TokenKind::Le => CompareOp::Order(OrderOp::Le),
            TokenKind::Gt => CompareOp::Order(OrderOp::Gt),
            TokenKind::Ge => CompareOp::Order(OrderOp::Ge),
            _ => return Ok(left),
        };
        self.tokens.next();
        let right = self.operand()?;
        Ok(QueryExpr::Compare(Box::new(left), op, Box::new(right)))
    }

    fn operand(&mut self) -> QueryResult<QueryExpr> {
        match self.tokens.peek().clone() {
            TokenKind::Str(s) => {
                self.tokens.next();
                Ok(QueryExpr::Literal(Value::String(s)))
            }
            TokenKind::Num(n) => {
                self.tokens.next();
                Ok(QueryExpr::Literal(number(n)))
            }
            TokenKind::Minus => {
                self.tokens.next();
                match self.tokens.next() {
                    TokenKind::Num(n) => Ok(QueryExpr::Literal(number(-n))),
                    _ => Err(self.tokens.unexpected("expected a number after '-'")),
                }
            }
            TokenKind::Ident(ref word) if word == "true" || word == "false" => {
                self.tokens.next();
                Ok(QueryExpr::Literal(Value::Bool(word == "true")))
            }
            TokenKind::Ident(ref word) if word == "null" => {
                self.tokens.next();
                Ok(QueryExpr::Literal(Value::Null))
            }
            TokenKind::LBracket => {
                self.tokens.next();
                let mut items = Vec::new();
                if !self.tokens.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.or_expr()?);
                        if self.tokens.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.tokens.expect(&TokenKind::Comma)?;
                    }
                }
                Ok(QueryExpr::Array(items))
            }
            TokenKind::LParen => {
                self.tokens.next();
                let inner = self.or_expr()?;
                self.tokens.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(_) | TokenKind::Quoted(_) => self.path(),
            _ => Err(self.tokens.unexpected("expected a path or a literal")),
        }
    }

    fn path(&mut self) -> QueryResult<QueryExpr> {
        let mut steps = vec![self.step(true)?];
        while self.tokens.eat(&TokenKind::Dot) {
            steps.push(self.step(false)?);
        }
        Ok(QueryExpr::Path(steps))
    }

    fn step(&mut self, first: bool) -> QueryResult<Step> {
        let target = match self.tokens.next() {
            TokenKind::Ident(name) if name == "$" => StepTarget::Current,
            TokenKind::Ident(name) if name == "$$" && first => StepTarget::Root,
            TokenKind::Ident(name) if name.starts_with('$') => {
                return Err(ExpressionError::syntax(
                    self.tokens.offset(),
                    format!("Unsupported variable or function '{}'", name),
                ))
            }
            TokenKind::Ident(name) | TokenKind::Quoted(name) => StepTarget::Field(name),
            other => {
                return Err(ExpressionError::syntax(
                    self.tokens.offset(),
                    format!("Unexpected {}, expected a field name", other),
                ))
            }
        };
        let mut filters = Vec::new();
        while self.tokens.eat(&TokenKind::LBracket) {
            filters.push(self.or_expr()?);
            self.tokens.expect(&TokenKind::RBracket)?;
        }
        Ok(Step { target, filters })
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.tokens.peek(), TokenKind::Ident(word) if word == keyword) {
            self.tokens.next();
            true
        } else {
            false
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[derive(Clone, Copy)]
struct Scope<'a> {
    current: &'a Value,
    root: &'a Value,
}

type Sequence<'a> = Vec<Cow<'a, Value>>;

fn eval<'a>(expr: &QueryExpr, scope: Scope<'a>) -> QueryResult<Sequence<'a>> {
    match expr {
        QueryExpr::Path(steps) => Ok(walk(steps, scope)?
            .into_iter()
            .map(Cow::Borrowed)
            .collect()),
        QueryExpr::Literal(value) => Ok(vec![Cow::Owned(value.clone())]),
        QueryExpr::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                for value in eval(item, scope)? {
                    match value.into_owned() {
                        Value::Array(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
            }
            Ok(vec![Cow::Owned(Value::Array(out))])
        }
        QueryExpr::Compare(left, op, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            Ok(vec![Cow::Owned(Value::Bool(compare(left, *op, right)?))])
        }
        QueryExpr::In(needle, haystack) => {
            let needle = eval(needle, scope)?;
            let haystack = eval(haystack, scope)?;
            let Some(needle) = singleton(&needle)? else {
                return Ok(vec![Cow::Owned(Value::Bool(false))]);
            };
            let found = haystack.iter().any(|candidate| match candidate.as_ref() {
                Value::Array(items) => items.iter().any(|item| json_eq(item, needle)),
                other => json_eq(other, needle),
            });
            Ok(vec![Cow::Owned(Value::Bool(found))])
        }
        QueryExpr::And(left, right) => {
            let result = truthy(&eval(left, scope)?) && truthy(&eval(right, scope)?);
            Ok(vec![Cow::Owned(Value::Bool(result))])
        }
        QueryExpr::Or(left, right) => {
            let result = truthy(&eval(left, scope)?) || truthy(&eval(right, scope)?);
            Ok(vec![Cow::Owned(Value::Bool(result))])
        }
    }
}

fn walk<'a>(steps: &[Step], scope: Scope<'a>) -> QueryResult<Vec<&'a Value>> {
    let mut sequence = vec![scope.current];
    for step in steps {
        let mut next = Vec::new();
        for parent in sequence {
            let mut selected = Vec::new();
            match &step.target {
                StepTarget::Current => flatten_into(parent, &mut selected),
                StepTarget::Root => flatten_into(scope.root, &mut selected),
                StepTarget::Field(name) => {
                    if let Some(child) = parent.as_object().and_then(|obj| obj.get(name)) {
                        flatten_into(child, &mut selected);
                    }
                }
            }
            for filter in &step.filters {
                selected = apply_filter(filter, selected, scope.root)?;
            }
            next.extend(selected);
        }
        sequence = next;
    }
    Ok(sequence)
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => out.extend(items.iter()),
        other => out.push(other),
    }
}

fn apply_filter<'a>(
    filter: &QueryExpr,
    candidates: Vec<&'a Value>,
    root: &'a Value,
) -> QueryResult<Vec<&'a Value>> {
    let len = candidates.len() as i64;
    let mut kept = Vec::new();
    for (position, candidate) in candidates.into_iter().enumerate() {
        let result = eval(
            filter,
            Scope {
                current: candidate,
                root,
            },
        )?;
        let keep = match result.as_slice() {
            [single] if single.is_number() => {
                let index = single.as_f64().unwrap_or(f64::NAN).floor() as i64;
                let index = if index < 0 { len + index } else { index };
                index == position as i64
            }
            _ => truthy(&result),
        };
        if keep {
            kept.push(candidate);
        }
    }
    Ok(kept)
}

fn singleton<'s, 'a>(sequence: &'s Sequence<'a>) -> QueryResult<Option<&'s Value>> {
    match sequence.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(single.as_ref())),
        _ => Err(ExpressionError::evaluation(
            "Ordering operand must be a single value, got a sequence",
        )),
    }
}

/// Collapses a sequence into one operand. Several values compare as an array.
fn collapse(sequence: Sequence<'_>) -> Option<Value> {
    match sequence.len() {
        0 => None,
        1 => sequence.into_iter().next().map(Cow::into_owned),
        _ => Some(Value::Array(
            sequence.into_iter().map(Cow::into_owned).collect(),
        )),
    }
}

fn compare(left: Sequence<'_>, op: CompareOp, right: Sequence<'_>) -> QueryResult<bool> {
    match op {
        CompareOp::Eq | CompareOp::Ne => {
            let (Some(l), Some(r)) = (collapse(left), collapse(right)) else {
                return Ok(false);
            };
            let equal = json_eq(&l, &r);
            Ok(if op == CompareOp::Eq { equal } else { !equal })
        }
        CompareOp::Order(order) => {
            let (Some(l), Some(r)) = (singleton(&left)?, singleton(&right)?) else {
                return Ok(false);
            };
            compare_order(l, order, r)
        }
    }
}

fn compare_order(left: &Value, op: OrderOp, right: &Value) -> QueryResult<bool> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => {
            return Err(ExpressionError::evaluation(
                "Ordering comparisons need two numbers or two strings",
            ))
        }
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        OrderOp::Lt => ordering.is_lt(),
        OrderOp::Le => ordering.is_le(),
        OrderOp::Gt => ordering.is_gt(),
        OrderOp::Ge => ordering.is_ge(),
    })
}

/// Structural equality that treats `1` and `1.0` as the same number.
pub(crate) fn json_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(l), Value::Object(r)) => {
            l.len() == r.len()
                && l.iter()
                    .all(|(k, v)| r.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => left == right,
    }
}

/// JSONata boolean cast of a sequence.
fn truthy(sequence: &Sequence<'_>) -> bool {
    match sequence.as_slice() {
        [] => false,
        [single] => value_truthy(single),
        many => many.iter().any(|v| value_truthy(v)),
    }
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => items.iter().any(value_truthy),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> Value {
        json!({
            "declaration": {
                "service": "billing",
                "provider": { "stage": "dev", "region": "us-east-1", "memorySize": 512 },
                "functions": [
                    { "name": "charge", "runtime": "nodejs12.x", "timeout": 6 },
                    { "name": "refund", "runtime": "python3.8", "timeout": 30 }
                ]
            }
        })
    }

    #[test]
    fn test_equality_filter_matches() {
        assert!(matches("declaration.provider[stage='dev']", &service()).unwrap());
        assert!(!matches("declaration.provider[stage='prod']", &service()).unwrap());
    }

    #[test]
    fn test_membership_filter() {
        let data = service();
        assert!(matches("declaration.provider[stage in ['dev','stage']]", &data).unwrap());
        assert!(!matches("declaration.provider[stage in ['prod','stage']]", &data).unwrap());
        assert!(
            matches("declaration.provider[region in ['us-east-1', 'us-east-2']]", &data).unwrap()
        );
    }

    #[test]
    fn test_unquoted_value_is_a_path() {
        // `dev` is read as a field of provider, which does not exist.
        assert!(!matches("declaration.provider[stage=dev]", &service()).unwrap());
    }

    #[test]
    fn test_arrays_are_flattened() {
        let query = Query::parse("declaration.functions.name").unwrap();
        assert_eq!(
            query.evaluate(&service()).unwrap(),
            vec![json!("charge"), json!("refund")]
        );
    }

    #[test]
    fn test_filters_on_arrays() {
        let data = service();
        let query = Query::parse("declaration.functions[timeout > 10].name").unwrap();
        assert_eq!(query.evaluate(&data).unwrap(), vec![json!("refund")]);
        assert!(!matches("declaration.functions[runtime = 'go1.x']", &data).unwrap());
    }

    #[test]
    fn test_index_filters() {
        let data = service();
        let first = Query::parse("declaration.functions[0].name").unwrap();
        assert_eq!(first.evaluate(&data).unwrap(), vec![json!("charge")]);
        let last = Query::parse("declaration.functions[-1].name").unwrap();
        assert_eq!(last.evaluate(&data).unwrap(), vec![json!("refund")]);
    }

    #[test]
    fn test_boolean_connectives() {
        let data = service();
        assert!(matches(
            "declaration.provider[stage='dev' and region='us-east-1']",
            &data
        )
        .unwrap());
        assert!(matches(
            "declaration.provider[stage='prod' or memorySize >= 512]",
            &data
        )
        .unwrap());
    }

    #[test]
    fn test_top_level_comparison() {
        let data = service();
        assert!(matches("declaration.provider.stage = 'dev'", &data).unwrap());
        assert!(!matches("declaration.provider.stage != 'dev'", &data).unwrap());
        assert!(!matches("declaration.missing = 'dev'", &data).unwrap());
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let data = json!({ "limits": { "memory": 1024 } });
        assert!(matches("limits[memory = 1024.0]", &data).unwrap());
    }

    #[test]
    fn test_missing_path_does_not_match() {
        assert!(!matches("declaration.custom.enterprise", &service()).unwrap());
    }

    #[test]
    fn test_current_and_root_references() {
        let data = service();
        assert!(matches("declaration.provider.stage[$ = 'dev']", &data).unwrap());
        assert!(matches(
            "declaration.functions[$$.declaration.service = 'billing']",
            &data
        )
        .unwrap());
    }

    #[test]
    fn test_backtick_field_names() {
        let data = json!({ "custom": { "odd key": true } });
        assert!(matches("custom.`odd key`", &data).unwrap());
    }

    #[test]
    fn test_malformed_queries() {
        assert!(Query::parse("declaration.provider[stage='dev'").is_err());
        assert!(Query::parse("declaration..provider").is_err());
        assert!(Query::parse("declaration.provider[stage == 'dev']").is_err());
        assert!(Query::parse("$count(declaration.functions)").is_err());
        assert_eq!(Query::parse("   "), Err(ExpressionError::Empty));
    }

    #[test]
    fn test_equality_against_several_values() {
        let data = json!({ "provider": { "tags": ["a", "b"] } });
        assert!(!matches("provider[tags='zzz']", &data).unwrap());
        assert!(!matches("provider[tags='a']", &data).unwrap());
        assert!(matches("provider[tags!='zzz']", &data).unwrap());
        assert!(matches("provider[tags=['a', 'b']]", &data).unwrap());

        let service = service();
        assert!(!matches("declaration.functions.runtime = 'python'", &service).unwrap());
        assert!(matches("declaration.functions.runtime != 'python'", &service).unwrap());
    }

    #[test]
    fn test_ordering_against_several_values_is_an_error() {
        let err = matches("declaration.functions.timeout > 5", &service()).unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluation(_)));
    }

    #[test]
    fn test_nesting_limit() {
        let data = json!({ "a": 1 });
        let shallow = format!("{}a = 1{}", "(".repeat(20), ")".repeat(20));
        assert!(matches(&shallow, &data).unwrap());

        let deep = format!("{}a{}", "[".repeat(10_000), "]".repeat(10_000));
        let err = Query::parse(&deep).unwrap_err();
        assert!(matches!(err, ExpressionError::Syntax { .. }));
        assert!(err.to_string().contains("nested too deeply"));

        let chain = vec!["a = 1"; 200].join(" and ");
        assert!(Query::parse(&chain).is_err());
    }

    #[test]
    fn test_ordering_type_mismatch_is_an_error() {
        let err = matches("declaration.provider[stage > 5]", &service()).unwrap_err();
        assert!(matches!(err, ExpressionError::Evaluation(_)));
    }
}
