//! Filter expressions behind `Query`.
//!
//! The grammar is small:
//!
//! ```text
//! or    := and ("OR" and)*
//! and   := not ("AND" not)*
//! not   := "NOT" not | atom
//! atom  := "(" or ")" | column "IS" ["NOT"] "NULL" | column op literal
//! op    := "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! Keywords are case-insensitive. Literals are integers, decimals, quoted
//! strings, `true`/`false` and `NULL`. Columns are kept as names and looked up
//! in a table only when evaluated.

use crate::column::ColumnValue;
use crate::error::{Result, TableError};
use crate::table::Table;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        column: String,
        op: CompareOp,
        value: LiteralValue,
    },
    IsNull { column: String },
    IsNotNull { column: String },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: LiteralValue) -> Self {
        Expr::Compare {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    fn visit_columns<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Compare { column, .. } | Expr::IsNull { column } | Expr::IsNotNull { column } => {
                f(column.as_str())
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.visit_columns(f);
                right.visit_columns(f);
            }
            Expr::Not(inner) => inner.visit_columns(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    const ALL: [CompareOp; 6] = [
        CompareOp::Le,
        CompareOp::Ge,
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Lt,
        CompareOp::Gt,
    ];

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Int(n) => write!(f, "{}", n),
            LiteralValue::Float(v) => write!(f, "{:?}", v),
            LiteralValue::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            LiteralValue::Bool(b) => write!(f, "{}", b),
            LiteralValue::Null => write!(f, "NULL"),
        }
    }
}

/// Renders text that `parse_expr` reads back to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare { column, op, value } => write!(f, "{} {} {}", column, op.symbol(), value),
            Expr::IsNull { column } => write!(f, "{} IS NULL", column),
            Expr::IsNotNull { column } => write!(f, "{} IS NOT NULL", column),
            Expr::And(left, right) => write!(f, "({}) AND ({})", left, right),
            Expr::Or(left, right) => write!(f, "({}) OR ({})", left, right),
            Expr::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

// ==================== Parsing ====================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(LiteralValue),
    Op(CompareOp),
    Open,
    Close,
}

fn parse_error(msg: impl Into<String>) -> TableError {
    TableError::Parse(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next_is_digit = chars.get(i + 1).is_some_and(|d| d.is_ascii_digit());
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' || c == ')' {
            tokens.push(if c == '(' { Token::Open } else { Token::Close });
            i += 1;
        } else if c == '\'' || c == '"' {
            let (text, end) = read_quoted(&chars, i)?;
            tokens.push(Token::Literal(LiteralValue::String(text)));
            i = end;
        } else if c.is_ascii_digit() || (c == '-' && next_is_digit) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::Literal(parse_number(&text)?));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.to_ascii_uppercase().as_str() {
                "TRUE" => Token::Literal(LiteralValue::Bool(true)),
                "FALSE" => Token::Literal(LiteralValue::Bool(false)),
                "NULL" => Token::Literal(LiteralValue::Null),
                _ => Token::Word(word),
            });
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = CompareOp::ALL
                .into_iter()
                .find(|op| rest.starts_with(op.symbol()))
                .ok_or_else(|| parse_error(format!("unexpected character '{}'", c)))?;
            tokens.push(Token::Op(op));
            i += op.symbol().len();
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<LiteralValue> {
    let parsed = if text.contains('.') {
        text.parse().ok().map(LiteralValue::Float)
    } else {
        text.parse().ok().map(LiteralValue::Int)
    };
    parsed.ok_or_else(|| parse_error(format!("bad number '{}'", text)))
}

/// Reads a quoted string starting at `open`; returns it and the index past the
/// closing quote. A backslash takes the next character literally.
fn read_quoted(chars: &[char], open: usize) -> Result<(String, usize)> {
    let quote = chars[open];
    let mut text = String::new();
    let mut i = open + 1;
    while let Some(&c) = chars.get(i) {
        match c {
            '\\' => {
                if let Some(&escaped) = chars.get(i + 1) {
                    text.push(escaped);
                }
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(parse_error("unterminated string"))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn or(&mut self) -> Result<Expr> {
        let mut expr = self.and()?;
        while self.eat_keyword("OR") {
            expr = expr.or(self.and()?);
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut expr = self.not()?;
        while self.eat_keyword("AND") {
            expr = expr.and(self.not()?);
        }
        Ok(expr)
    }

    fn not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        let column = match self.next() {
            Some(Token::Open) => {
                let inner = self.or()?;
                return match self.next() {
                    Some(Token::Close) => Ok(inner),
                    other => Err(parse_error(format!("expected ')', got {:?}", other))),
                };
            }
            Some(Token::Word(column)) => column,
            other => return Err(parse_error(format!("expected column name, got {:?}", other))),
        };

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            return match self.next() {
                Some(Token::Literal(LiteralValue::Null)) if negated => Ok(Expr::IsNotNull { column }),
                Some(Token::Literal(LiteralValue::Null)) => Ok(Expr::IsNull { column }),
                other => Err(parse_error(format!("expected NULL after IS, got {:?}", other))),
            };
        }

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(parse_error(format!("expected comparison after '{}', got {:?}", column, other))),
        };
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expr::Compare { column, op, value }),
            other => Err(parse_error(format!("expected literal, got {:?}", other))),
        }
    }
}

/// Parse filter text into an expression tree.
pub fn parse_expr(input: &str) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(extra) => Err(parse_error(format!("unexpected {:?} after expression", extra))),
    }
}

// ==================== Evaluation ====================

/// Map each column name used by `expr` to its index in `table`.
pub fn resolve_columns(expr: &Expr, table: &Table) -> Result<HashMap<String, usize>> {
    let mut columns = HashMap::new();
    let mut missing = None;
    expr.visit_columns(&mut |name| {
        if columns.contains_key(name) || missing.is_some() {
            return;
        }
        match table.column_index(name) {
            Some(col) => {
                columns.insert(name.to_string(), col);
            }
            None => missing = Some(name.to_string()),
        }
    });
    match missing {
        Some(name) => Err(TableError::ColumnNotFound(name)),
        None => Ok(columns),
    }
}

/// Evaluate `expr` against one row of `table`, with `columns` from
/// `resolve_columns`. A comparison against null is false.
pub fn eval_row(expr: &Expr, table: &Table, columns: &HashMap<String, usize>, row: usize) -> bool {
    let cell = |name: &str| {
        columns
            .get(name)
            .and_then(|&col| table.column(col))
            .and_then(|col| col.get_ref(row))
    };
    match expr {
        Expr::Compare { column, op, value } => {
            cell(column.as_str()).is_some_and(|v| compare_cell(v, *op, value))
        }
        Expr::IsNull { column } => matches!(cell(column.as_str()), None | Some(ColumnValue::Null)),
        Expr::IsNotNull { column } => !matches!(cell(column.as_str()), None | Some(ColumnValue::Null)),
        Expr::And(left, right) => eval_row(left, table, columns, row) && eval_row(right, table, columns, row),
        Expr::Or(left, right) => eval_row(left, table, columns, row) || eval_row(right, table, columns, row),
        Expr::Not(inner) => !eval_row(inner, table, columns, row),
    }
}

/// How a cell orders against a literal, None when they cannot be compared.
/// Datetimes compare as epoch milliseconds and links as target rows.
fn order_against(cell: &ColumnValue, literal: &LiteralValue) -> Option<Ordering> {
    let cell_number = match cell {
        ColumnValue::Int32(v) => Some(*v as f64),
        ColumnValue::Int64(v) | ColumnValue::DateTime(v) => Some(*v as f64),
        ColumnValue::Link(v) => Some(*v as f64),
        ColumnValue::Float32(v) => Some(*v as f64),
        ColumnValue::Float64(v) => Some(*v),
        _ => None,
    };
    match (cell, literal) {
        (ColumnValue::Int64(a) | ColumnValue::DateTime(a), LiteralValue::Int(b)) => Some(a.cmp(b)),
        (_, LiteralValue::Int(b)) => cell_number?.partial_cmp(&(*b as f64)),
        (_, LiteralValue::Float(b)) => cell_number?.partial_cmp(b),
        (ColumnValue::String(a), LiteralValue::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn compare_cell(cell: &ColumnValue, op: CompareOp, literal: &LiteralValue) -> bool {
    match (cell, literal, op) {
        (ColumnValue::Bool(a), LiteralValue::Bool(b), CompareOp::Eq) => a == b,
        (ColumnValue::Bool(a), LiteralValue::Bool(b), CompareOp::Ne) => a != b,
        (ColumnValue::Bool(_), _, _) => false,
        _ => order_against(cell, literal).is_some_and(|ord| op.holds(ord)),
    }
}
