//! Free-form boolean expressions over the deployment context.
//!
//! The grammar is a sandboxed subset of JavaScript expressions: literals,
//! dotted and indexed access on context bindings, a few string/array methods,
//! arithmetic, relational, equality and logical operators, and the ternary
//! conditional. Operators follow JavaScript precedence and coercion rules.
//! There are no assignments, no arbitrary function calls and no access to
//! anything outside the context, so evaluating untrusted rule text cannot
//! have side effects.
//!
//! `jsonata("<query>")` may appear anywhere a value is expected and yields
//! whether the query matches the context root.

use crate::error::ExpressionError;
use crate::lexer::{TokenKind, TokenStream};
use crate::query::Query;
use serde_json::{Map, Value};
use std::borrow::Cow;

type ExprResult<T> = std::result::Result<T, ExpressionError>;

/// Name of the call form that embeds a structured query.
pub const QUERY_CALL: &str = "jsonata";

/// A parsed boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Query(Query),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Expression {
    /// Parses expression text.
    pub fn parse(text: &str) -> ExprResult<Self> {
        let mut tokens = TokenStream::new(text)?;
        if *tokens.peek() == TokenKind::Eof {
            return Err(ExpressionError::Empty);
        }
        let root = Parser { tokens: &mut tokens }.conditional()?;
        tokens.expect_eof()?;
        Ok(Self { root })
    }

    /// Evaluates the expression with the top-level fields of `context` as
    /// bindings and returns its truthiness.
    pub fn evaluate(&self, context: &Value) -> ExprResult<bool> {
        let empty = Map::new();
        let env = Env {
            bindings: context.as_object().unwrap_or(&empty),
            document: context,
        };
        Ok(env.eval(&self.root)?.truthy())
    }
}

struct Parser<'t> {
    tokens: &'t mut TokenStream,
}

impl Parser<'_> {
    fn conditional(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        self.tokens.enter()?;
        let expr = self.ternary()?;
        self.tokens.restore(depth);
        Ok(expr)
    }

    fn ternary(&mut self) -> ExprResult<Expr> {
        let test = self.or()?;
        if !self.tokens.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.conditional()?;
        self.tokens.expect(&TokenKind::Colon)?;
        let alternate = self.conditional()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    // Each operator applied in a chain nests the tree one level deeper, so
    // chains count against the nesting limit too.

    fn or(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.and()?;
        while self.tokens.eat(&TokenKind::OrOr) {
            self.tokens.enter()?;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn and(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.equality()?;
        while self.tokens.eat(&TokenKind::AndAnd) {
            self.tokens.enter()?;
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn equality(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.relational()?;
        loop {
            let op = match self.tokens.peek() {
                TokenKind::EqEq => BinaryOp::LooseEq,
                TokenKind::NotEq => BinaryOp::LooseNe,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NotEqEq => BinaryOp::StrictNe,
                _ => break,
            };
            self.tokens.next();
            self.tokens.enter()?;
            let right = self.relational()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn relational(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.additive()?;
        loop {
            let op = match self.tokens.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.tokens.next();
            self.tokens.enter()?;
            let right = self.additive()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn additive(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.tokens.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.tokens.next();
            self.tokens.enter()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn multiplicative(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut left = self.unary()?;
        loop {
            let op = match self.tokens.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.tokens.next();
            self.tokens.enter()?;
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.tokens.restore(depth);
        Ok(left)
    }

    fn unary(&mut self) -> ExprResult<Expr> {
        let op = match self.tokens.peek() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        self.tokens.next();
        let depth = self.tokens.depth();
        self.tokens.enter()?;
        let operand = self.unary()?;
        self.tokens.restore(depth);
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> ExprResult<Expr> {
        let depth = self.tokens.depth();
        let mut expr = self.primary()?;
        loop {
            match self.tokens.peek() {
                TokenKind::Dot => {
                    self.tokens.next();
                    self.tokens.enter()?;
                    let offset = self.tokens.offset();
                    match self.tokens.next() {
                        TokenKind::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                        other => {
                            return Err(ExpressionError::syntax(
                                offset,
                                format!("Unexpected {}, expected a property name", other),
                            ))
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.tokens.next();
                    self.tokens.enter()?;
                    let index = self.conditional()?;
                    self.tokens.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::LParen => {
                    self.tokens.enter()?;
                    expr = self.call(expr)?;
                }
                _ => break,
            }
        }
        self.tokens.restore(depth);
        Ok(expr)
    }

    fn call(&mut self, callee: Expr) -> ExprResult<Expr> {
        let offset = self.tokens.offset();
        self.tokens.expect(&TokenKind::LParen)?;
        match callee {
            Expr::Ident(name) if name == QUERY_CALL => {
                let text = match self.tokens.next() {
                    TokenKind::Str(text) | TokenKind::Quoted(text) => text,
                    _ => {
                        return Err(ExpressionError::syntax(
                            offset,
                            "jsonata() takes a single string literal",
                        ))
                    }
                };
                self.tokens.expect(&TokenKind::RParen)?;
                Ok(Expr::Query(Query::parse(&text)?))
            }
            Expr::Member(target, method) => {
                let mut args = Vec::new();
                if !self.tokens.eat(&TokenKind::RParen) {
                    loop {
                        args.push(self.conditional()?);
                        if self.tokens.eat(&TokenKind::RParen) {
                            break;
                        }
                        self.tokens.expect(&TokenKind::Comma)?;
                    }
                }
                Ok(Expr::MethodCall(target, method, args))
            }
            _ => Err(ExpressionError::syntax(offset, "Unsupported function call")),
        }
    }

    fn primary(&mut self) -> ExprResult<Expr> {
        let offset = self.tokens.offset();
        match self.tokens.next() {
            TokenKind::Num(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) | TokenKind::Quoted(s) => Ok(Expr::String(s)),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                "NaN" => Expr::Number(f64::NAN),
                "Infinity" => Expr::Number(f64::INFINITY),
                _ => Expr::Ident(name),
            }),
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.tokens.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.conditional()?);
                        if self.tokens.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.tokens.expect(&TokenKind::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::LParen => {
                let inner = self.conditional()?;
                self.tokens.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(ExpressionError::syntax(
                offset,
                format!("Unexpected {}", other),
            )),
        }
    }
}

/// A runtime value. Context nodes are borrowed; computed values are owned.
#[derive(Debug, Clone)]
enum Operand<'a> {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Cow<'a, str>),
    /// An array or object node of the context.
    Node(&'a Value),
    /// An array built by an array literal.
    List(Vec<Operand<'a>>),
}

impl<'a> Operand<'a> {
    fn from_json(value: &'a Value) -> Self {
        match value {
            Value::Null => Operand::Null,
            Value::Bool(b) => Operand::Bool(*b),
            Value::Number(n) => Operand::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Operand::String(Cow::Borrowed(s)),
            Value::Array(_) | Value::Object(_) => Operand::Node(value),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Operand::Undefined => "undefined",
            Operand::Null => "null",
            Operand::Bool(_) => "boolean",
            Operand::Number(_) => "number",
            Operand::String(_) => "string",
            Operand::Node(_) | Operand::List(_) => "object",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Undefined | Operand::Null => false,
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::String(s) => !s.is_empty(),
            Operand::Node(_) | Operand::List(_) => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Operand::Undefined => f64::NAN,
            Operand::Null => 0.0,
            Operand::Bool(b) => f64::from(u8::from(*b)),
            Operand::Number(n) => *n,
            Operand::String(s) => string_to_number(s),
            Operand::Node(Value::Object(_)) => f64::NAN,
            Operand::Node(_) | Operand::List(_) => string_to_number(&self.to_js_string()),
        }
    }

    fn to_js_string(&self) -> String {
        match self {
            Operand::Undefined => "undefined".to_string(),
            Operand::Null => "null".to_string(),
            Operand::Bool(b) => b.to_string(),
            Operand::Number(n) => number_to_string(*n),
            Operand::String(s) => s.to_string(),
            Operand::Node(Value::Array(items)) => join(items.iter().map(Operand::from_json)),
            Operand::Node(_) => "[object Object]".to_string(),
            Operand::List(items) => join(items.iter().cloned()),
        }
    }

    fn is_object(&self) -> bool {
        matches!(self, Operand::Node(_) | Operand::List(_))
    }

    /// Elements when the operand is array-like.
    fn elements(&self) -> Option<Vec<Operand<'a>>> {
        match self {
            Operand::Node(node) => {
                let node: &'a Value = *node;
                node.as_array()
                    .map(|items| items.iter().map(Operand::from_json).collect())
            }
            Operand::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

fn join<'a>(items: impl Iterator<Item = Operand<'a>>) -> String {
    items
        .map(|item| match item {
            Operand::Undefined | Operand::Null => String::new(),
            other => other.to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.abs() < 1e21 {
        format!("{}", n)
    } else {
        let exponential = format!("{:e}", n);
        match exponential.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => exponential,
        }
    }
}

fn strict_equals(left: &Operand<'_>, right: &Operand<'_>) -> bool {
    match (left, right) {
        (Operand::Undefined, Operand::Undefined) | (Operand::Null, Operand::Null) => true,
        (Operand::Bool(l), Operand::Bool(r)) => l == r,
        (Operand::Number(l), Operand::Number(r)) => l == r,
        (Operand::String(l), Operand::String(r)) => l == r,
        (Operand::Node(l), Operand::Node(r)) => std::ptr::eq(*l, *r),
        _ => false,
    }
}

fn loose_equals(left: &Operand<'_>, right: &Operand<'_>) -> bool {
    use Operand::*;
    match (left, right) {
        (Undefined | Null, Undefined | Null) => true,
        (Undefined | Null, _) | (_, Undefined | Null) => false,
        (Number(l), String(r)) => *l == string_to_number(r),
        (String(l), Number(r)) => string_to_number(l) == *r,
        (Bool(b), other) => loose_equals(&Number(f64::from(u8::from(*b))), other),
        (other, Bool(b)) => loose_equals(other, &Number(f64::from(u8::from(*b)))),
        (l, r) if l.is_object() && !r.is_object() => {
            loose_equals(&String(Cow::Owned(l.to_js_string())), r)
        }
        (l, r) if !l.is_object() && r.is_object() => {
            loose_equals(l, &String(Cow::Owned(r.to_js_string())))
        }
        (l, r) => strict_equals(l, r),
    }
}

struct Env<'a> {
    bindings: &'a Map<String, Value>,
    document: &'a Value,
}

impl<'a> Env<'a> {
    fn eval(&self, expr: &Expr) -> ExprResult<Operand<'a>> {
        Ok(match expr {
            Expr::Undefined => Operand::Undefined,
            Expr::Null => Operand::Null,
            Expr::Bool(b) => Operand::Bool(*b),
            Expr::Number(n) => Operand::Number(*n),
            Expr::String(s) => Operand::String(Cow::Owned(s.clone())),
            Expr::Array(items) => Operand::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<ExprResult<Vec<_>>>()?,
            ),
            Expr::Ident(name) => self
                .bindings
                .get(name)
                .map(Operand::from_json)
                .ok_or_else(|| ExpressionError::UndefinedBinding(name.clone()))?,
            Expr::Member(target, name) => member(self.eval(target)?, name)?,
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_into(target, index)?
            }
            Expr::MethodCall(target, method, args) => {
                let target = self.eval(target)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<ExprResult<Vec<_>>>()?;
                call_method(target, method, &args)?
            }
            Expr::Query(query) => Operand::Bool(query.matches(self.document)?),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Operand::Bool(!value.truthy()),
                    UnaryOp::Neg => Operand::Number(-value.to_number()),
                    UnaryOp::Plus => Operand::Number(value.to_number()),
                }
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(left, *op, right)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)?
                } else {
                    left
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    left
                } else {
                    self.eval(right)?
                }
            }
            Expr::Conditional(test, consequent, alternate) => {
                if self.eval(test)?.truthy() {
                    self.eval(consequent)?
                } else {
                    self.eval(alternate)?
                }
            }
        })
    }
}

fn index_into<'a>(target: Operand<'a>, index: Operand<'a>) -> ExprResult<Operand<'a>> {
    if let Operand::Number(n) = index {
        if n >= 0.0 && n.fract() == 0.0 {
            let i = n as usize;
            return match target {
                Operand::Node(Value::Array(items)) => {
                    Ok(items.get(i).map(Operand::from_json).unwrap_or(Operand::Undefined))
                }
                Operand::List(items) => Ok(items.into_iter().nth(i).unwrap_or(Operand::Undefined)),
                Operand::String(s) => Ok(s
                    .chars()
                    .nth(i)
                    .map(|c| Operand::String(Cow::Owned(c.to_string())))
                    .unwrap_or(Operand::Undefined)),
                other => member(other, &number_to_string(n)),
            };
        }
    }
    member(target, &index.to_js_string())
}

fn member<'a>(target: Operand<'a>, name: &str) -> ExprResult<Operand<'a>> {
    match target {
        Operand::Undefined | Operand::Null => Err(ExpressionError::evaluation(format!(
            "Cannot read properties of {} (reading '{}')",
            target.type_name(),
            name
        ))),
        Operand::Node(Value::Object(map)) => {
            Ok(map.get(name).map(Operand::from_json).unwrap_or(Operand::Undefined))
        }
        Operand::Node(Value::Array(items)) if name == "length" => {
            Ok(Operand::Number(items.len() as f64))
        }
        Operand::List(items) if name == "length" => Ok(Operand::Number(items.len() as f64)),
        Operand::String(s) if name == "length" => {
            Ok(Operand::Number(s.encode_utf16().count() as f64))
        }
        _ => Ok(Operand::Undefined),
    }
}

fn call_method<'a>(
    target: Operand<'a>,
    method: &str,
    args: &[Operand<'a>],
) -> ExprResult<Operand<'a>> {
    let arg = args.first().cloned().unwrap_or(Operand::Undefined);
    if let Operand::String(s) = &target {
        let needle = arg.to_js_string();
        return match method {
            "includes" => Ok(Operand::Bool(s.contains(needle.as_str()))),
            "startsWith" => Ok(Operand::Bool(s.starts_with(needle.as_str()))),
            "endsWith" => Ok(Operand::Bool(s.ends_with(needle.as_str()))),
            "indexOf" => Ok(Operand::Number(
                s.find(needle.as_str())
                    .map(|byte| s[..byte].encode_utf16().count() as f64)
                    .unwrap_or(-1.0),
            )),
            _ => Err(not_a_function(&target, method)),
        };
    }
    if let Some(items) = target.elements() {
        let position = items.iter().position(|item| strict_equals(item, &arg));
        return match method {
            "includes" => Ok(Operand::Bool(
                position.is_some()
                    || (matches!(arg, Operand::Number(n) if n.is_nan())
                        && items
                            .iter()
                            .any(|item| matches!(item, Operand::Number(n) if n.is_nan()))),
            )),
            "indexOf" => Ok(Operand::Number(position.map(|p| p as f64).unwrap_or(-1.0))),
            _ => Err(not_a_function(&target, method)),
        };
    }
    if matches!(target, Operand::Undefined | Operand::Null) {
        return Err(ExpressionError::evaluation(format!(
            "Cannot read properties of {} (reading '{}')",
            target.type_name(),
            method
        )));
    }
    Err(not_a_function(&target, method))
}

fn not_a_function(target: &Operand<'_>, method: &str) -> ExpressionError {
    ExpressionError::evaluation(format!(
        "{}.{} is not a function",
        target.type_name(),
        method
    ))
}

fn binary<'a>(left: Operand<'a>, op: BinaryOp, right: Operand<'a>) -> Operand<'a> {
    match op {
        BinaryOp::LooseEq => Operand::Bool(loose_equals(&left, &right)),
        BinaryOp::LooseNe => Operand::Bool(!loose_equals(&left, &right)),
        BinaryOp::StrictEq => Operand::Bool(strict_equals(&left, &right)),
        BinaryOp::StrictNe => Operand::Bool(!strict_equals(&left, &right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Operand::Bool(relational(&left, op, &right))
        }
        BinaryOp::Add => {
            let stringy = |o: &Operand<'_>| matches!(o, Operand::String(_)) || o.is_object();
            if stringy(&left) || stringy(&right) {
                Operand::String(Cow::Owned(left.to_js_string() + &right.to_js_string()))
            } else {
                Operand::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Operand::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Operand::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Operand::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Operand::Number(left.to_number() % right.to_number()),
    }
}

fn relational(left: &Operand<'_>, op: BinaryOp, right: &Operand<'_>) -> bool {
    let ordering = match (left, right) {
        (Operand::String(l), Operand::String(r)) => Some(l.cmp(r)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}
