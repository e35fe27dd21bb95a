//! Test expressions for `<if>`, `<when>` and `<bind>`.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      := and (("or" | "||") and)*
//! and     := not (("and" | "&&") not)*
//! not     := ("not" | "!") not | compare
//! compare := additive (("==" | "!=" | "<" | "<=" | ">" | ">=") additive)?
//! additive:= unary (("+" | "-") unary)*
//! unary   := "-" unary | primary
//! primary := literal | path | "(" or ")"
//! path    := ident ("." ident ("()")?)*
//! ```
//!
//! Absent names evaluate to null. Truthiness: null, false, 0 and the empty
//! string are false; everything else is true.

use serde_json::{Number, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

/// Name lookup used during evaluation.
pub trait Scope {
    /// Value bound to a root name, if any.
    fn lookup(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    Dot,
    Call,
    LParen,
    RParen,
    Cmp(CompareOp),
    Plus,
    Minus,
    And,
    Or,
    Not,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some(&ch) if ch == quote => break,
                        Some(&'\\') if chars.get(i + 1).is_some() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{text}`"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' if next == Some(')') && matches!(tokens.last(), Some(Token::Ident(_))) => {
                tokens.push(Token::Call);
                i += 2;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Eq));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Ne));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let eq = next == Some('=');
                tokens.push(Token::Cmp(match (c, eq) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                }));
                i += if eq { 2 } else { 1 };
            }
            other => return Err(format!("unexpected character `{other}`")),
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

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.not()?));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.additive()?;
            return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.unary()?));
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected `)`".into()),
                }
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    let mut path = vec![word];
                    loop {
                        match self.peek() {
                            Some(Token::Call) => self.pos += 1,
                            Some(Token::Dot) => {
                                self.pos += 1;
                                match self.bump() {
                                    Some(Token::Ident(seg)) => path.push(seg),
                                    Some(Token::Num(n)) if n.fract() == 0.0 => {
                                        path.push((n as u64).to_string());
                                    }
                                    _ => return Err("expected property name after `.`".into()),
                                }
                            }
                            _ => return Ok(Expr::Path(path)),
                        }
                    }
                }
            },
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

/// Parse a test expression.
pub fn parse(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        ));
    }
    Ok(expr)
}

/// Walk `path` from its root through objects, lists and built-in properties.
pub fn resolve_path(scope: &dyn Scope, path: &[String]) -> Option<Value> {
    let (root, rest) = path.split_first()?;
    let mut current = scope.lookup(root)?;
    for seg in rest {
        current = match (&current, seg.as_str()) {
            (Value::Array(items), "length" | "size") => Value::from(items.len()),
            (Value::String(s), "length" | "size") => Value::from(s.chars().count()),
            (Value::String(s), "trim") => Value::String(s.trim().to_string()),
            (Value::Object(map), key) => map.get(key).cloned().unwrap_or(Value::Null),
            (Value::Array(items), key) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Some(current)
}

impl Expr {
    /// Evaluate against `scope`.
    pub fn eval(&self, scope: &dyn Scope) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Path(path) => resolve_path(scope, path).unwrap_or(Value::Null),
            Self::Not(inner) => Value::Bool(!truthy(&inner.eval(scope))),
            Self::Neg(inner) => match to_number(&inner.eval(scope)) {
                Some(n) => number_value(-n),
                None => Value::Null,
            },
            Self::And(l, r) => Value::Bool(truthy(&l.eval(scope)) && truthy(&r.eval(scope))),
            Self::Or(l, r) => Value::Bool(truthy(&l.eval(scope)) || truthy(&r.eval(scope))),
            Self::Compare(l, op, r) => Value::Bool(compare(&l.eval(scope), *op, &r.eval(scope))),
            Self::Add(l, r) => {
                let (a, b) = (l.eval(scope), r.eval(scope));
                if a.is_string() || b.is_string() {
                    Value::String(format!("{}{}", display(&a), display(&b)))
                } else {
                    match (to_number(&a), to_number(&b)) {
                        (Some(x), Some(y)) => number_value(x + y),
                        _ => Value::Null,
                    }
                }
            }
            Self::Sub(l, r) => match (to_number(&l.eval(scope)), to_number(&r.eval(scope))) {
                (Some(x), Some(y)) => number_value(x - y),
                _ => Value::Null,
            },
        }
    }

    /// Evaluate and coerce to a boolean.
    pub fn test(&self, scope: &dyn Scope) -> bool {
        truthy(&self.eval(scope))
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Integral results stay integers so they render without a fraction.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn compare(a: &Value, op: CompareOp, b: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(a, b),
        CompareOp::Ne => !loose_eq(a, b),
        _ => {
            let ordering = match (a, b) {
                (Value::String(x), Value::String(y)) => match (to_number(a), to_number(b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => Some(x.cmp(y)),
                },
                _ => match (to_number(a), to_number(b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
            };
            match ordering {
                Some(Ordering::Less) => matches!(op, CompareOp::Lt | CompareOp::Le),
                Some(Ordering::Equal) => matches!(op, CompareOp::Le | CompareOp::Ge),
                Some(Ordering::Greater) => matches!(op, CompareOp::Gt | CompareOp::Ge),
                None => false,
            }
        }
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_) | Value::String(_) | Value::Bool(_), Value::Number(_))
        | (Value::Number(_), Value::String(_) | Value::Bool(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}
