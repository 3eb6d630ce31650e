//! SCIM 2.0 Filter Parser
//!
//! This module implements a parser for SCIM filter expressions per RFC 7644 Section 3.4.2.
//!
//! ## Grammar (simplified)
//!
//! ```text
//! filter     = orExpr
//! orExpr     = andExpr { "or" andExpr }
//! andExpr    = notExpr { "and" notExpr }
//! notExpr    = "not" "(" filter ")" | "(" filter ")" | attrExpr
//! attrExpr   = attrPath "pr" | attrPath compareOp compValue
//!            | attrPath "[" filter "]" [ "." ATTRNAME ( "pr" | compareOp compValue ) ]
//! compareOp  = "eq" | "ne" | "co" | "sw" | "ew" | "gt" | "ge" | "lt" | "le"
//! compValue  = "true" | "false" | "null" | NUMBER | STRING
//! ```
//!
//! Bracketed value filters are flattened: inside `emails[...]` every attribute
//! name is qualified with `emails.`, and a trailing `.sub op value` is joined
//! to the bracket expression with `and`.
//!
//! ## Examples
//!
//! ```text
//! userName eq "john"
//! meta.lastModified gt "2011-05-13T04:42:34Z"
//! emails[type eq "work" and value co "@example.com"]
//! emails[type eq "work"].value sw "john"
//! not (active eq false) or rackNumber ge 12
//! ```
//!
//! ## Limits
//!
//! Inputs longer than [`FilterLimits::max_length`] bytes or nested deeper than
//! [`FilterLimits::max_depth`] levels are rejected before evaluation.

use std::fmt;

use super::{error::ScimError, value::parse_datetime};

/// Default maximum length of a filter expression (bytes).
pub const MAX_FILTER_LENGTH: usize = 4096;

/// Default maximum nesting depth of a filter expression.
///
/// Parentheses, `not (...)` and bracketed value filters each add one level.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Weight of a node whose selectivity has not been estimated.
pub const UNKNOWN_WEIGHT: i64 = -1;

/// Size and nesting limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimits {
    pub max_length: usize,
    pub max_depth: usize,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self {
            max_length: MAX_FILTER_LENGTH,
            max_depth: MAX_FILTER_DEPTH,
        }
    }
}

/// Node operators. Logical operators carry children, the rest are leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
    Not,
    Eq,
    Ne,
    Co,
    Sw,
    Ew,
    Gt,
    Lt,
    Ge,
    Le,
    Pr,
}

impl Operator {
    /// Parse a comparison operator, case-insensitively.
    fn comparison(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "co" => Some(Operator::Co),
            "sw" => Some(Operator::Sw),
            "ew" => Some(Operator::Ew),
            "gt" => Some(Operator::Gt),
            "lt" => Some(Operator::Lt),
            "ge" => Some(Operator::Ge),
            "le" => Some(Operator::Le),
            _ => None,
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Operator::And | Operator::Or | Operator::Not)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Co => "co",
            Operator::Sw => "sw",
            Operator::Ew => "ew",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Ge => "ge",
            Operator::Le => "le",
            Operator::Pr => "pr",
        };
        f.write_str(s)
    }
}

/// A comparison literal, typed at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Decimal(f64),
    Bool(bool),
    /// A quoted RFC 3339 timestamp. `raw` keeps the text for string attributes.
    DateTime { millis: i64, raw: String },
    Null,
}

impl Literal {
    /// Empty or whitespace-only strings and `null`.
    pub fn is_blank(&self) -> bool {
        match self {
            Literal::Str(s) => s.trim().is_empty(),
            Literal::Null => true,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) | Literal::DateTime { raw: s, .. } => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Decimal(d) => write!(f, "{d:?}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// A node of a parsed filter.
///
/// Leaves carry an attribute path in `name` and, except for `pr`, a literal.
/// `and`/`or` nodes have two or more children, `not` exactly one.
/// `weight` orders siblings during compilation; see [`super::selectivity`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub op: Operator,
    pub name: String,
    pub value: Option<Literal>,
    pub children: Vec<FilterNode>,
    pub weight: i64,
}

impl FilterNode {
    pub fn compare(op: Operator, name: impl Into<String>, value: Literal) -> Self {
        Self {
            op,
            name: name.into(),
            value: Some(value),
            children: Vec::new(),
            weight: UNKNOWN_WEIGHT,
        }
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self {
            op: Operator::Pr,
            name: name.into(),
            value: None,
            children: Vec::new(),
            weight: UNKNOWN_WEIGHT,
        }
    }

    fn logical(op: Operator, children: Vec<FilterNode>) -> Self {
        Self {
            op,
            name: String::new(),
            value: None,
            children,
            weight: UNKNOWN_WEIGHT,
        }
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::logical(Operator::And, children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::logical(Operator::Or, children)
    }

    pub fn not(child: FilterNode) -> Self {
        Self::logical(Operator::Not, vec![child])
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::And | Operator::Or => {
                f.write_str("(")?;
                for (i, child) in self.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", self.op)?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Operator::Not => match self.children.first() {
                Some(child) => write!(f, "not ({child})"),
                None => f.write_str("not ()"),
            },
            Operator::Pr => write!(f, "{} pr", self.name),
            op => match &self.value {
                Some(value) => write!(f, "{} {} {}", self.name, op, value),
                None => write!(f, "{} {} null", self.name, op),
            },
        }
    }
}

/// Filter parsing error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at position {position}")]
pub struct FilterParseError {
    pub message: String,
    pub position: usize,
}

impl From<FilterParseError> for ScimError {
    fn from(err: FilterParseError) -> Self {
        ScimError::invalid_filter(err.to_string())
    }
}

/// Parse a SCIM filter expression with the default limits.
///
/// # Examples
///
/// ```
/// use sparrow::scim::filter::{Operator, parse_filter};
///
/// let node = parse_filter("userName eq \"john\" and emails pr").unwrap();
/// assert_eq!(node.op, Operator::And);
/// ```
pub fn parse_filter(input: &str) -> Result<FilterNode, FilterParseError> {
    parse_filter_with(input, &FilterLimits::default())
}

/// Parse a SCIM filter expression.
///
/// # Errors
///
/// Returns an error if the input exceeds `limits` or has invalid syntax.
/// No partial tree is ever returned.
pub fn parse_filter_with(
    input: &str,
    limits: &FilterLimits,
) -> Result<FilterNode, FilterParseError> {
    if input.len() > limits.max_length {
        return Err(FilterParseError {
            message: format!(
                "Filter exceeds maximum length ({} bytes, max {})",
                input.len(),
                limits.max_length
            ),
            position: 0,
        });
    }

    let mut parser = Parser::new(input, limits.max_depth);
    let result = parser.parse_filter().and_then(|node| {
        parser.skip_whitespace();
        if parser.position < parser.input.len() {
            return Err(parser.error(format!(
                "Unexpected input: '{}'",
                &parser.input[parser.position..]
            )));
        }
        Ok(node)
    });

    if let Err(err) = &result {
        tracing::debug!(filter = %input, error = %err, "Failed to parse filter");
    }
    result
}

// =============================================================================
// Parser Implementation
// =============================================================================

struct Parser<'a> {
    input: &'a str,
    position: usize,
    depth: usize,
    max_depth: usize,
    /// Attribute qualifying names inside a bracketed value filter
    prefix: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, max_depth: usize) -> Self {
        Self {
            input,
            position: 0,
            depth: 0,
            max_depth,
            prefix: None,
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterParseError {
        FilterParseError {
            message: message.into(),
            position: self.position,
        }
    }

    /// Enter a nested scope (parentheses, brackets, etc.).
    fn enter_scope(&mut self) -> Result<(), FilterParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error(format!(
                "Filter exceeds maximum nesting depth ({})",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn exit_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn parse_filter(&mut self) -> Result<FilterNode, FilterParseError> {
        self.parse_or_expr()
    }

    // orExpr = andExpr { "or" andExpr }
    fn parse_or_expr(&mut self) -> Result<FilterNode, FilterParseError> {
        let mut children = vec![self.parse_and_expr()?];
        while self.try_keyword("or") {
            children.push(self.parse_and_expr()?);
        }

        Ok(match children.len() {
            1 => children.remove(0),
            _ => FilterNode::or(children),
        })
    }

    // andExpr = notExpr { "and" notExpr }
    fn parse_and_expr(&mut self) -> Result<FilterNode, FilterParseError> {
        let mut children = vec![self.parse_not_expr()?];
        while self.try_keyword("and") {
            children.push(self.parse_not_expr()?);
        }

        Ok(match children.len() {
            1 => children.remove(0),
            _ => FilterNode::and(children),
        })
    }

    // notExpr = "not" "(" filter ")" | "(" filter ")" | attrExpr
    fn parse_not_expr(&mut self) -> Result<FilterNode, FilterParseError> {
        self.skip_whitespace();

        if self.try_keyword("not") {
            self.skip_whitespace();
            if !self.try_char('(') {
                return Err(self.error("Expected '(' after 'not'"));
            }
            let inner = self.parse_group("Expected ')' to close 'not' expression")?;
            return Ok(FilterNode::not(inner));
        }

        if self.try_char('(') {
            return self.parse_group("Expected ')' to close grouped expression");
        }

        self.parse_attr_expr()
    }

    /// Parse the remainder of a parenthesized group; '(' is already consumed.
    fn parse_group(&mut self, unclosed: &str) -> Result<FilterNode, FilterParseError> {
        self.enter_scope()?;
        let inner = self.parse_filter()?;
        self.exit_scope();
        self.skip_whitespace();
        if !self.try_char(')') {
            return Err(self.error(unclosed));
        }
        Ok(inner)
    }

    // attrExpr = attrPath ( "pr" | compareOp compValue | "[" filter "]" [ "." subExpr ] )
    fn parse_attr_expr(&mut self) -> Result<FilterNode, FilterParseError> {
        let name = self.parse_attr_name()?;

        if self.peek() == Some('[') {
            return self.parse_value_filter(name);
        }

        self.parse_comparison(name)
    }

    fn parse_comparison(&mut self, name: String) -> Result<FilterNode, FilterParseError> {
        self.skip_whitespace();
        if self.try_keyword("pr") {
            return Ok(FilterNode::present(name));
        }

        let op = self.parse_compare_op()?;
        let value = self.parse_value()?;
        Ok(FilterNode::compare(op, name, value))
    }

    /// `attr[filter]` with an optional trailing `.sub op value`.
    fn parse_value_filter(&mut self, name: String) -> Result<FilterNode, FilterParseError> {
        if self.prefix.is_some() {
            return Err(self.error("Nested value filters are not supported"));
        }

        self.advance();
        self.enter_scope()?;
        self.skip_whitespace();
        if self.peek() == Some(']') {
            return Err(self.error("Empty value filter"));
        }

        self.prefix = Some(name.clone());
        let inner = self.parse_filter();
        self.prefix = None;
        let inner = inner?;
        self.exit_scope();

        self.skip_whitespace();
        if !self.try_char(']') {
            return Err(self.error("Expected ']' to close value filter"));
        }

        if !self.try_char('.') {
            return Ok(inner);
        }

        let sub = self.parse_attr_name()?;
        let trailing = self.parse_comparison(format!("{name}.{sub}"))?;
        Ok(FilterNode::and(vec![inner, trailing]))
    }

    fn parse_attr_name(&mut self) -> Result<String, FilterParseError> {
        self.skip_whitespace();

        let start = self.position;

        // Attribute names start with a letter or '$' (e.g. "$ref")
        if !self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == '$') {
            return Err(self.error("Expected attribute name"));
        }

        // Names may carry a schema URI prefix and a sub-attribute suffix
        while self.peek().is_some_and(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$' | ':' | '.')
        }) {
            self.advance();
        }

        let name = &self.input[start..self.position];
        if name.ends_with(['.', ':']) {
            return Err(FilterParseError {
                message: format!("Invalid attribute name: '{name}'"),
                position: start,
            });
        }

        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        })
    }

    fn parse_compare_op(&mut self) -> Result<Operator, FilterParseError> {
        self.skip_whitespace();

        let start = self.position;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.advance();
        }

        let op_str = &self.input[start..self.position];
        if op_str.is_empty() {
            return Err(self.error("Expected comparison operator"));
        }

        Operator::comparison(op_str).ok_or_else(|| FilterParseError {
            message: format!("Unknown operator: '{op_str}'"),
            position: start,
        })
    }

    fn parse_value(&mut self) -> Result<Literal, FilterParseError> {
        self.skip_whitespace();

        if self.peek() == Some('"') {
            return self.parse_string_value();
        }

        if self.try_keyword("true") {
            return Ok(Literal::Bool(true));
        }
        if self.try_keyword("false") {
            return Ok(Literal::Bool(false));
        }
        if self.try_keyword("null") {
            return Ok(Literal::Null);
        }

        if self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
        {
            return self.parse_number_value();
        }

        Err(self.error("Expected value (string, boolean, number, or null)"))
    }

    fn parse_string_value(&mut self) -> Result<Literal, FilterParseError> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(FilterParseError {
                        message: "Unterminated string".to_string(),
                        position: start,
                    });
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => {
                            value.push(c);
                            self.advance();
                        }
                        _ => return Err(self.error("Invalid escape sequence")),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Ok(match parse_datetime(&value) {
            Some(millis) => Literal::DateTime { millis, raw: value },
            None => Literal::Str(value),
        })
    }

    fn parse_number_value(&mut self) -> Result<Literal, FilterParseError> {
        let start = self.position;

        if self.peek() == Some('-') || self.peek() == Some('+') {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let mut fractional = false;
        if self.peek() == Some('.') {
            fractional = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            fractional = true;
            self.advance();
            if self.peek() == Some('-') || self.peek() == Some('+') {
                self.advance();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let num_str = &self.input[start..self.position];
        let invalid = || FilterParseError {
            message: format!("Invalid number: '{num_str}'"),
            position: start,
        };

        if !fractional && let Ok(i) = num_str.parse::<i64>() {
            return Ok(Literal::Int(i));
        }
        num_str
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(Literal::Decimal)
            .ok_or_else(invalid)
    }

    // Helper methods

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.position += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn try_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();

        let remaining = &self.input[self.position..];

        if remaining.len() >= keyword.len()
            && remaining.is_char_boundary(keyword.len())
            && remaining[..keyword.len()].eq_ignore_ascii_case(keyword)
        {
            // Make sure keyword is not part of a larger identifier
            let after_keyword = remaining[keyword.len()..].chars().next();
            if after_keyword.is_none_or(|c| !c.is_ascii_alphanumeric()) {
                self.position += keyword.len();
                return true;
            }
        }

        false
    }
}

// =============================================================================
// Tests
// =============================================================================
