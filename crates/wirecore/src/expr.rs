//! User-expression parsing and evaluation against a variable snapshot.
//!
//! Grammar: dotted paths, `[i]` indexing, `==` `!=` `<` `<=` `>` `>=`,
//! `&&` `||` `!`, arithmetic, single-quoted strings, numeric and boolean
//! literals. A small hand-written recursive-descent parser keeps the
//! dependency surface at zero for this module.

use crate::node::{Comparison, ComparisonKind};
use crate::{ExprError, Value};
use std::collections::BTreeMap;

pub type Snapshot = BTreeMap<String, Value>;

/// Generic evaluation entry point.
pub fn evaluate(expression: &str, vars: &Snapshot) -> Result<Value, ExprError> {
    let ast = parse(expression)?;
    eval(&ast, vars)
}

/// Evaluate a path expected to yield an ordered sequence.
pub fn eval_array(path: &str, vars: &Snapshot) -> Result<Vec<Value>, ExprError> {
    match evaluate(path, vars)? {
        Value::Array(items) => Ok(items),
        other => Err(ExprError::TypeMismatch {
            expected: "array".into(),
            found: kind_name(&other).into(),
        }),
    }
}

/// Evaluate a path expected to yield a keyed mapping. Entries come back in
/// the store's deterministic key order.
pub fn eval_map(path: &str, vars: &Snapshot) -> Result<Vec<(String, Value)>, ExprError> {
    match evaluate(path, vars)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ExprError::TypeMismatch {
            expected: "map".into(),
            found: kind_name(&other).into(),
        }),
    }
}

/// Evaluate a single comparison: `kind` selects the operator family applied
/// between the value at `path` and `rhs`.
pub fn assert_simple(
    kind: ComparisonKind,
    path: &str,
    rhs: &str,
    vars: &Snapshot,
) -> Result<bool, ExprError> {
    let expression = normalize(&Comparison {
        path: path.to_string(),
        kind,
        value: rhs.to_string(),
        expression: String::new(),
    })?;
    Ok(evaluate(&expression, vars)?.is_truthy())
}

/// Turn a structured comparison into an expression string. An explicit
/// `expression` wins; otherwise the comparison is assembled from its parts.
pub fn normalize(cmp: &Comparison) -> Result<String, ExprError> {
    if !cmp.expression.is_empty() {
        return Ok(cmp.expression.clone());
    }
    if cmp.path.is_empty() {
        return Err(ExprError::Normalize("comparison has no path".into()));
    }
    let op = match cmp.kind {
        ComparisonKind::Equal => "==",
        ComparisonKind::NotEqual => "!=",
        ComparisonKind::Less => "<",
        ComparisonKind::LessOrEqual => "<=",
        ComparisonKind::Greater => ">",
        ComparisonKind::GreaterOrEqual => ">=",
        ComparisonKind::Unspecified => {
            return Err(ExprError::Normalize("comparison kind is unspecified".into()))
        }
    };
    let rhs = if cmp.value.parse::<f64>().is_ok()
        || cmp.value == "true"
        || cmp.value == "false"
    {
        cmp.value.clone()
    } else {
        format!("'{}'", cmp.value.replace('\'', "\\'"))
    };
    Ok(format!("{} {} {}", cmp.path, op, rhs))
}

/// Three-character status pattern with `*` wildcards, matched against an
/// HTTP status code rendered as a string. Exact match is tried before the
/// glob.
pub fn match_status(pattern: &str, code: &str) -> bool {
    if pattern == code {
        return true;
    }
    if pattern.len() != 3 || code.len() != 3 {
        return false;
    }
    pattern
        .chars()
        .zip(code.chars())
        .all(|(p, c)| p == '*' || p == c)
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// --- lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        // a digit followed by '.' then a non-digit is a path
                        // boundary, not a decimal point
                        if d == '.' {
                            let mut ahead = chars.clone();
                            ahead.next();
                            if !ahead.peek().is_some_and(|n| n.is_ascii_digit()) {
                                break;
                            }
                        }
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::Parse(format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('\'') => text.push('\''),
                            Some('\\') => text.push('\\'),
                            Some(other) => {
                                text.push('\\');
                                text.push(other);
                            }
                            None => return Err(ExprError::Parse("unterminated string".into())),
                        },
                        Some('\'') => break,
                        Some(other) => text.push(other),
                        None => return Err(ExprError::Parse("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(ExprError::Parse("expected '==' after '='".into()));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.next() == Some('&') {
                    tokens.push(Token::And);
                } else {
                    return Err(ExprError::Parse("expected '&&'".into()));
                }
            }
            '|' => {
                chars.next();
                if chars.next() == Some('|') {
                    tokens.push(Token::Or);
                } else {
                    return Err(ExprError::Parse("expected '||'".into()));
                }
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(text),
                });
            }
            other => return Err(ExprError::Parse(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

// --- parser ---

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Vec<Seg>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Seg {
    Field(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn parse(input: &str) -> Result<Expr, ExprError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Parse(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Token) -> Result<(), ExprError> {
        if self.eat(&t) {
            Ok(())
        } else {
            Err(ExprError::Parse(format!("expected {:?}", t)))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let mut segs = vec![Seg::Field(name)];
                loop {
                    if self.eat(&Token::Dot) {
                        match self.bump() {
                            Some(Token::Ident(field)) => segs.push(Seg::Field(field)),
                            _ => return Err(ExprError::Parse("expected field after '.'".into())),
                        }
                    } else if self.eat(&Token::LBracket) {
                        let index = self.or_expr()?;
                        self.expect(Token::RBracket)?;
                        segs.push(Seg::Index(Box::new(index)));
                    } else {
                        break;
                    }
                }
                Ok(Expr::Path(segs))
            }
            other => Err(ExprError::Parse(format!("unexpected token {:?}", other))),
        }
    }
}

// --- evaluation ---

fn eval(expr: &Expr, vars: &Snapshot) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segs) => resolve_path(segs, vars),
        Expr::Unary(op, inner) => {
            let v = eval(inner, vars)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                UnaryOp::Neg => match v {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(ExprError::TypeMismatch {
                        expected: "number".into(),
                        found: kind_name(&other).into(),
                    }),
                },
            }
        }
        Expr::Binary(op, left, right) => {
            // short-circuit logical operators
            match op {
                BinOp::And => {
                    let l = eval(left, vars)?;
                    if !l.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval(right, vars)?.is_truthy()));
                }
                BinOp::Or => {
                    let l = eval(left, vars)?;
                    if l.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval(right, vars)?.is_truthy()));
                }
                _ => {}
            }
            let l = eval(left, vars)?;
            let r = eval(right, vars)?;
            apply_binary(*op, l, r)
        }
    }
}

fn resolve_path(segs: &[Seg], vars: &Snapshot) -> Result<Value, ExprError> {
    let mut display = String::new();
    let first = match &segs[0] {
        Seg::Field(name) => name,
        Seg::Index(_) => return Err(ExprError::Parse("path cannot start with an index".into())),
    };
    display.push_str(first);
    let mut current = vars
        .get(first)
        .cloned()
        .ok_or_else(|| ExprError::PathNotFound(display.clone()))?;

    for seg in &segs[1..] {
        match seg {
            Seg::Field(field) => {
                display.push('.');
                display.push_str(field);
                current = match current {
                    Value::Object(map) => map
                        .get(field)
                        .cloned()
                        .ok_or_else(|| ExprError::PathNotFound(display.clone()))?,
                    other => {
                        return Err(ExprError::TypeMismatch {
                            expected: "object".into(),
                            found: kind_name(&other).into(),
                        })
                    }
                };
            }
            Seg::Index(index_expr) => {
                let index = eval(index_expr, vars)?;
                let i = index.as_f64().ok_or_else(|| ExprError::TypeMismatch {
                    expected: "number".into(),
                    found: kind_name(&index).into(),
                })? as usize;
                display.push_str(&format!("[{}]", i));
                current = match current {
                    Value::Array(items) => items
                        .get(i)
                        .cloned()
                        .ok_or_else(|| ExprError::PathNotFound(display.clone()))?,
                    other => {
                        return Err(ExprError::TypeMismatch {
                            expected: "array".into(),
                            found: kind_name(&other).into(),
                        })
                    }
                };
            }
        }
    }
    Ok(current)
}

fn apply_binary(op: BinOp, l: Value, r: Value) -> Result<Value, ExprError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (a, b) = numeric_pair(&l, &r)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            }))
        }
        BinOp::Add => match (&l, &r) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b.render()))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a.render(), b))),
            _ => {
                let (a, b) = numeric_pair(&l, &r)?;
                Ok(Value::Number(a + b))
            }
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (a, b) = numeric_pair(&l, &r)?;
            Ok(Value::Number(match op {
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                _ => unreachable!(),
            }))
        }
        BinOp::And | BinOp::Or => unreachable!("handled by short-circuit"),
    }
}

/// Equality with string/number coercion: `response.status == '200'` holds.
fn loose_eq(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (coerce_number(l), coerce_number(r)) {
        return a == b;
    }
    match (l, r) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => l == r,
    }
}

fn coerce_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn numeric_pair(l: &Value, r: &Value) -> Result<(f64, f64), ExprError> {
    match (coerce_number(l), coerce_number(r)) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(ExprError::TypeMismatch {
            expected: "number".into(),
            found: kind_name(l).into(),
        }),
        (_, None) => Err(ExprError::TypeMismatch {
            expected: "number".into(),
            found: kind_name(r).into(),
        }),
    }
}
