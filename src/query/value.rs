//! Comparable property values used by predicates, ranges, and sort keys.
//!
//! Absence of a value (`NULL`) is modelled as `Option::None` at every use site rather
//! than as a variant, so predicates can distinguish "equals null" structurally.
use std::cmp::Ordering;
use std::fmt::Write as _;

/// Typed property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer value.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// UTF-8 string value.
    String(String),
    /// Nanoseconds since Unix epoch in UTC.
    DateTime(i128),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::String(_) => 2,
            Value::DateTime(_) => 3,
        }
    }

    /// Compares two values of compatible kinds.
    ///
    /// Integers and floats compare numerically; every other pairing of different kinds is
    /// incomparable and yields `None`. Strings compare case-sensitively.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: strings compare case-insensitively, floats use
    /// `total_cmp`, and different kinds order by a fixed kind rank.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a
                .chars()
                .flat_map(char::to_lowercase)
                .cmp(b.chars().flat_map(char::to_lowercase)),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            _ => self
                .compare(other)
                .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank())),
        }
    }

    /// Returns true when `min <= self <= max` under [`Value::compare`].
    pub fn in_range(&self, min: &Value, max: &Value) -> bool {
        matches!(
            self.compare(min),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ) && matches!(self.compare(max), Some(Ordering::Less) | Some(Ordering::Equal))
    }

    /// Appends a self-delimiting encoding of the value to a handle buffer.
    pub(crate) fn write_handle(&self, out: &mut String) {
        let _ = match self {
            Value::Bool(v) => write!(out, "b:{v}"),
            Value::Int(v) => write!(out, "i:{v}"),
            Value::Float(v) => write!(out, "f:{:x}", v.to_bits()),
            Value::String(v) => write!(out, "s{}:{v}", v.len()),
            Value::DateTime(v) => write!(out, "d:{v}"),
        };
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
