//! Boolean expression language over numeric metrics, used both for node
//! conditions and for quality-gate predicates.
//!
//! Grammar (low to high precedence):
//! ```text
//! expr    := or_expr
//! or_expr := and_expr ( "OR" and_expr )*
//! and_expr:= not_expr ( "AND" not_expr )*
//! not_expr:= "NOT" not_expr | cmp_expr
//! cmp_expr:= atom ( ("==" | "!=" | "<" | "<=" | ">" | ">=") atom )?
//! atom    := identifier | number | "true" | "false" | "(" expr ")"
//! ```
//!
//! Node conditions and gate expressions share this one grammar: an
//! identifier always names a flat metric in the engine's numeric metrics
//! map (dependency/global outputs flattened by key), not a nested path
//! like `outputs['A']['field']` — the bracket-indexing form sometimes used
//! to describe conditions informally is resolved down to the flattened
//! key (`field`) before evaluation.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CmpOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

/// A parsed boolean expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A bare numeric metric reference.
    Metric(String),
    /// A literal number.
    Number(f64),
    /// `lhs OP rhs`.
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    /// `lhs AND rhs`.
    And(Box<Expr>, Box<Expr>),
    /// `lhs OR rhs`.
    Or(Box<Expr>, Box<Expr>),
    /// `NOT inner`.
    Not(Box<Expr>),
}

/// Errors raised while parsing an expression string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("expected closing parenthesis")]
    UnmatchedParen,
    #[error("trailing input after expression: {0}")]
    TrailingInput(String),
}

/// The outcome of evaluating an [`Expr`] against a metrics map.
///
/// Distinguishes a clean boolean result from one where an identifier in the
/// expression had no corresponding metric. A missing metric folds to
/// `false` rather than raising, but is reported separately so callers can
/// log the distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// The expression evaluated cleanly to this value.
    Value(bool),
    /// At least one referenced metric was absent; the expression folded to
    /// `false` at that point.
    MissingMetric(String),
}

impl EvalOutcome {
    /// Collapse to a plain bool, treating a missing metric as `false`.
    #[must_use]
    pub fn as_bool(&self) -> bool {
        matches!(self, EvalOutcome::Value(true))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CmpOp::Lt));
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CmpOp::Gt));
                i += 1;
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ParseError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    "true" => tokens.push(Token::Number(1.0)),
                    "false" => tokens.push(Token::Number(0.0)),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            other => return Err(ParseError::UnexpectedToken(other.to_string())),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_atom()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.parse_atom()?;
            return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(Expr::Metric(name)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ParseError::UnmatchedParen),
                }
            }
            Some(other) => Err(ParseError::UnexpectedToken(format!("{other:?}"))),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}

impl Expr {
    /// Parse a gate/condition expression string.
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            let rest: Vec<String> = parser.tokens[parser.pos..]
                .iter()
                .map(|t| format!("{t:?}"))
                .collect();
            return Err(ParseError::TrailingInput(rest.join(" ")));
        }
        Ok(expr)
    }

    /// Evaluate against a metrics map (identifier -> numeric value).
    #[must_use]
    pub fn eval(&self, metrics: &HashMap<String, f64>) -> EvalOutcome {
        match self.eval_numeric_or_bool(metrics) {
            Ok(EvalResult::Bool(b)) => EvalOutcome::Value(b),
            Ok(EvalResult::Number(n)) => EvalOutcome::Value(n != 0.0),
            Err(missing) => EvalOutcome::MissingMetric(missing),
        }
    }

    fn eval_numeric_or_bool(&self, metrics: &HashMap<String, f64>) -> Result<EvalResult, String> {
        match self {
            Expr::Metric(name) => metrics
                .get(name)
                .map(|v| EvalResult::Number(*v))
                .ok_or_else(|| name.clone()),
            Expr::Number(n) => Ok(EvalResult::Number(*n)),
            Expr::Compare(lhs, op, rhs) => {
                let l = lhs.eval_numeric_or_bool(metrics)?.as_number();
                let r = rhs.eval_numeric_or_bool(metrics)?.as_number();
                Ok(EvalResult::Bool(op.apply(l, r)))
            }
            Expr::And(lhs, rhs) => {
                let l = lhs.eval_numeric_or_bool(metrics);
                let r = rhs.eval_numeric_or_bool(metrics);
                combine(l, r, |a, b| a && b)
            }
            Expr::Or(lhs, rhs) => {
                let l = lhs.eval_numeric_or_bool(metrics);
                let r = rhs.eval_numeric_or_bool(metrics);
                combine(l, r, |a, b| a || b)
            }
            Expr::Not(inner) => {
                let v = inner.eval_numeric_or_bool(metrics)?.as_bool();
                Ok(EvalResult::Bool(!v))
            }
        }
    }
}

/// Combine two possibly-missing operands with a boolean operator, without
/// letting either side's missing metric short-circuit a result the other
/// side already determines. A missing operand folds to `false` for the
/// purpose of the combination itself; the missing identifier is only
/// surfaced when it actually changed the outcome (`OR(true, missing)` is
/// `true`, not `MissingMetric`, but `AND(true, missing)` is).
fn combine(
    l: Result<EvalResult, String>,
    r: Result<EvalResult, String>,
    op: impl Fn(bool, bool) -> bool,
) -> Result<EvalResult, String> {
    let lb = l.as_ref().map(EvalResult::as_bool).unwrap_or(false);
    let rb = r.as_ref().map(EvalResult::as_bool).unwrap_or(false);
    if op(lb, rb) {
        return Ok(EvalResult::Bool(true));
    }
    match (l, r) {
        (Err(name), _) | (_, Err(name)) => Err(name),
        _ => Ok(EvalResult::Bool(false)),
    }
}

enum EvalResult {
    Bool(bool),
    Number(f64),
}

impl EvalResult {
    fn as_number(&self) -> f64 {
        match self {
            EvalResult::Number(n) => *n,
            EvalResult::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            EvalResult::Bool(b) => *b,
            EvalResult::Number(n) => *n != 0.0,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Metric(name) => write!(f, "{name}"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Compare(l, op, r) => {
                let sym = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                write!(f, "{l} {sym} {r}")
            }
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}
