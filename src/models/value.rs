// Typed attribute values
// Generalizes the raw serde_json::Value the teacher used for rule fields
// into a type the evaluator can check attribute declarations against.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::ids::FqName;

/// A runtime attribute value.
///
/// `BTreeMap` (rather than `HashMap`) backs `Map` so that two
/// structurally-equal maps always compare and hash the same way
/// regardless of insertion order, which matters for `@distinct`
/// query results (see `spec.md` §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Number(f64),
    /// Arbitrary-precision decimal, kept as its canonical string form
    /// rather than `f64` so money-like attributes never lose digits.
    Decimal(String),
    Str(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A `ref`-typed attribute value: the entity it points at plus the
    /// referenced identifier value.
    Reference(FqName, Box<Value>),
    /// A resolved `__path__`-style instance path.
    Path(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort truthiness for use as an `if`/`where` condition.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// Numeric view used by comparison operators; promotes `Int` to
    /// `f64` the way the teacher's rule engine compared
    /// `FieldGreaterThan`/`FieldLessThan` fields.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::Decimal(d) => d.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Partial order used by `@orderBy`. Values of different kinds
    /// compare as equal (stable sort keeps their relative order),
    /// since the evaluator only ever orders by a single, type-checked
    /// attribute in practice.
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => return a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => {}
        }
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{dt}"),
            Value::Array(_) | Value::Map(_) => {
                write!(f, "{}", serde_json::to_string(self).unwrap_or_default())
            }
            Value::Reference(entity, id) => write!(f, "{entity}#{id}"),
            Value::Path(p) => write!(f, "{p}"),
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}
