//! Typed attribute values and the per-attribute schema entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute name to value, ordered by name so payloads are stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// Tolerance used when comparing a requested float with a reported one.
const FLOAT_TOLERANCE: f64 = 0.05;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Convert a JSON value into the given kind, if the JSON type fits.
    ///
    /// Integers are accepted where a float is expected, and integral floats
    /// where an integer is expected (devices are not consistent about it).
    #[must_use]
    pub fn from_json(value: &serde_json::Value, kind: AttributeKind) -> Option<Self> {
        match kind {
            AttributeKind::Bool => value.as_bool().map(Self::Bool),
            AttributeKind::Int => value.as_i64().map(Self::Int).or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Self::Int(f as i64))
            }),
            AttributeKind::Float => value.as_f64().map(Self::Float),
            AttributeKind::String => value.as_str().map(|s| Self::String(s.to_string())),
        }
    }

    /// The kind this value belongs to.
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Bool(_) => AttributeKind::Bool,
            Self::Int(_) => AttributeKind::Int,
            Self::Float(_) => AttributeKind::Float,
            Self::String(_) => AttributeKind::String,
        }
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    /// Whether a reported value satisfies a requested one.
    ///
    /// Numbers compare with a small tolerance so `21.5` requested and
    /// `21.49` reported by a valve count as the same setpoint.
    #[must_use]
    pub fn reflects(&self, requested: &Self) -> bool {
        match (self.as_f64(), requested.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < FLOAT_TOLERANCE,
            _ => self == requested,
        }
    }
}

/// The type an attribute is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Bool,
    Int,
    Float,
    String,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Float => "number",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

/// Schema entry describing one attribute of a capability class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub kind: AttributeKind,
    /// Whether commands may set this attribute.
    pub writable: bool,
    /// Inclusive bounds for numeric attributes.
    pub range: Option<(f64, f64)>,
}

impl AttributeSpec {
    pub(crate) const fn reported(name: &'static str, kind: AttributeKind) -> Self {
        Self {
            name,
            kind,
            writable: false,
            range: None,
        }
    }

    pub(crate) const fn writable(name: &'static str, kind: AttributeKind) -> Self {
        Self {
            name,
            kind,
            writable: true,
            range: None,
        }
    }

    pub(crate) const fn bounded(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Whether `value` lies within the declared range (always true if unbounded).
    #[must_use]
    pub fn in_range(&self, value: &AttributeValue) -> bool {
        match (self.range, value.as_f64()) {
            (Some((min, max)), Some(v)) => (min..=max).contains(&v),
            _ => true,
        }
    }
}
