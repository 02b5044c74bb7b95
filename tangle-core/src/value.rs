//! Port Values
//!
//! Every value that flows along a connection is a [`Value`]. Parameters in
//! the graph document are plain JSON; they are converted at the input
//! boundary with [`Value::from_json`].
//!
//! # Unit Preservation
//!
//! Inputs that carry a physical unit (for example `px` or `%`) keep their
//! previous unit when a raw number is pushed into them. Only an explicit
//! [`UnitValue`] changes the unit of such an input.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// A plain value with no unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    /// Absence of a value.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects that have no dedicated representation.
    Json(serde_json::Value),
}

/// A number tagged with a physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    pub value: f64,
    pub unit: String,
}

impl UnitValue {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Reference to an object owned outside the graph (a record, a model, a DOM node).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference(pub String);

/// A value carried by a port.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Unit(UnitValue),
    /// One level of a pulse. A signal is sent as `Signal(true)` followed by
    /// `Signal(false)`.
    Signal(bool),
    Reference(Reference),
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(Scalar::Null)
    }
}

impl Value {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn number(n: f64) -> Self {
        Value::Scalar(Scalar::Number(n))
    }

    pub fn boolean(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }

    pub fn unit(value: f64, unit: impl Into<String>) -> Self {
        Value::Unit(UnitValue::new(value, unit))
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Value::Reference(Reference(id.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    /// Truthiness, used by edge-triggered inputs and boolean ports.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Scalar(Scalar::Null) => false,
            Value::Scalar(Scalar::Bool(b)) => *b,
            Value::Scalar(Scalar::Number(n)) => *n != 0.0 && !n.is_nan(),
            Value::Scalar(Scalar::String(s)) => !s.is_empty(),
            Value::Scalar(Scalar::Json(json)) => !matches!(
                json,
                serde_json::Value::Null | serde_json::Value::Bool(false)
            ),
            Value::Unit(u) => u.value != 0.0,
            Value::Signal(level) => *level,
            Value::Reference(_) => true,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Scalar(Scalar::Number(n)) => Some(*n),
            Value::Scalar(Scalar::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Scalar(Scalar::String(s)) => s.trim().parse().ok(),
            Value::Unit(u) => Some(u.value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            Value::Reference(Reference(id)) => Some(id),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<&UnitValue> {
        match self {
            Value::Unit(u) => Some(u),
            _ => None,
        }
    }

    /// Coerce a value arriving at an input.
    ///
    /// A unitless number keeps the unit of the previous value, or the port's
    /// declared unit when the input has never held a unit value.
    pub fn coerce_with_previous(self, previous: Option<&Value>, port_unit: Option<&str>) -> Value {
        let Value::Scalar(Scalar::Number(n)) = self else {
            return self;
        };
        let unit = previous
            .and_then(Value::as_unit)
            .map(|u| u.unit.as_str())
            .or(port_unit);
        match unit {
            Some(unit) => Value::unit(n, unit),
            None => Value::number(n),
        }
    }

    /// Convert a JSON parameter into a port value.
    ///
    /// Objects of the shape `{"value": <number>, "unit": <string>}` become
    /// [`Value::Unit`]; other arrays and objects are kept as JSON.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::null(),
            serde_json::Value::Bool(b) => Value::boolean(b),
            serde_json::Value::Number(n) => Value::number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Object(map) => {
                let unit = match (map.get("value"), map.get("unit")) {
                    (Some(serde_json::Value::Number(n)), Some(serde_json::Value::String(u)))
                        if map.len() == 2 =>
                    {
                        Some(UnitValue::new(n.as_f64().unwrap_or(0.0), u.clone()))
                    }
                    _ => None,
                };
                match unit {
                    Some(unit) => Value::Unit(unit),
                    None => Value::Scalar(Scalar::Json(serde_json::Value::Object(map))),
                }
            }
            other => Value::Scalar(Scalar::Json(other)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(Scalar::Null) => serde_json::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Value::Scalar(Scalar::Number(n)) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Scalar(Scalar::String(s)) => serde_json::Value::String(s.clone()),
            Value::Scalar(Scalar::Json(json)) => json.clone(),
            Value::Unit(u) => serde_json::json!({ "value": u.value, "unit": u.unit }),
            Value::Signal(level) => serde_json::Value::Bool(*level),
            Value::Reference(Reference(id)) => serde_json::Value::String(id.clone()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit(u) => write!(f, "{}{}", u.value, u.unit),
            Value::Scalar(Scalar::String(s)) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}
