//! Typed attribute values.
//!
//! Every simple attribute value is one [`Value`]. Conversions from JSON are
//! checked against the declared [`AttrKind`] and fail with a [`ValueError`].

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use super::{
    error::ScimError,
    schema::{AttrKind, AttrType},
};

/// A single typed attribute value.
///
/// String, reference and binary attributes all hold [`Value::Str`];
/// dateTime values are kept as milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Str(String),
    DateTime(i64),
}

/// Errors raised when a value or attribute does not fit its schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("Attribute '{attribute}' expects a {expected} value, found {found}")]
    KindMismatch {
        attribute: String,
        expected: AttrKind,
        found: String,
    },

    #[error("Attribute '{attribute}' has an invalid dateTime value '{value}'")]
    InvalidDateTime { attribute: String, value: String },

    #[error("Single-valued attribute '{0}' must hold exactly one value")]
    Arity(String),

    #[error("Attribute '{0}' is not a complex attribute")]
    NotComplex(String),

    #[error("Attribute '{0}' is a complex attribute")]
    Complex(String),

    #[error("Unknown sub-attribute '{name}' of '{parent}'")]
    UnknownSubAttribute { parent: String, name: String },

    #[error("More than one entry of '{0}' is marked primary")]
    MultiplePrimary(String),
}

impl From<ValueError> for ScimError {
    fn from(err: ValueError) -> Self {
        match err {
            ValueError::UnknownSubAttribute { .. } => ScimError::invalid_syntax(err.to_string()),
            _ => ScimError::invalid_value(err.to_string()),
        }
    }
}

impl Value {
    /// Convert a JSON scalar into a value of `at`'s declared kind.
    pub fn from_json(at: &AttrType, json: &serde_json::Value) -> Result<Value, ValueError> {
        use serde_json::Value as J;

        let mismatch = || ValueError::KindMismatch {
            attribute: at.name.clone(),
            expected: at.kind,
            found: json_kind(json).to_string(),
        };

        match (at.kind, json) {
            (AttrKind::String | AttrKind::Reference | AttrKind::Binary, J::String(s)) => {
                Ok(Value::Str(s.clone()))
            }
            (AttrKind::Boolean, J::Bool(b)) => Ok(Value::Bool(*b)),
            (AttrKind::Integer, J::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(mismatch),
            (AttrKind::Decimal, J::Number(n)) => {
                n.as_f64().map(Value::Decimal).ok_or_else(mismatch)
            }
            (AttrKind::DateTime, J::String(s)) => {
                parse_datetime(s)
                    .map(Value::DateTime)
                    .ok_or_else(|| ValueError::InvalidDateTime {
                        attribute: at.name.clone(),
                        value: s.clone(),
                    })
            }
            (AttrKind::Complex, _) => Err(ValueError::Complex(at.name.clone())),
            _ => Err(mismatch()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Decimal(d) => serde_json::json!(d),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(millis) => serde_json::Value::String(format_datetime(*millis)),
        }
    }

    /// Whether this value can be stored in an attribute of `kind`.
    pub fn fits(&self, kind: AttrKind) -> bool {
        matches!(
            (self, kind),
            (Value::Bool(_), AttrKind::Boolean)
                | (Value::Int(_), AttrKind::Integer)
                | (Value::Decimal(_), AttrKind::Decimal)
                | (
                    Value::Str(_),
                    AttrKind::String | AttrKind::Reference | AttrKind::Binary
                )
                | (Value::DateTime(_), AttrKind::DateTime)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        serde_json::Value::Number(_) => "decimal",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_datetime(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Render epoch milliseconds as an RFC 3339 UTC timestamp.
///
/// Fractional seconds are only emitted when non-zero.
pub fn format_datetime(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => millis.to_string(),
    }
}
