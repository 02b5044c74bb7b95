//! Port declarations on node and component records.

use serde::{Deserialize, Serialize};

/// Which way a port plugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlugDirection {
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "output")]
    Output,
    #[serde(rename = "input/output")]
    InputOutput,
}

impl PlugDirection {
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InputOutput)
    }
}

/// Semantic type of the values a port carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortType {
    #[default]
    Any,
    Boolean,
    Number,
    String,
    Signal,
    Object,
    Array,
    Reference,
    Component,
    /// Editor-specific type names are kept verbatim.
    Custom(String),
}

impl From<String> for PortType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "*" | "any" => Self::Any,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "string" => Self::String,
            "signal" => Self::Signal,
            "object" => Self::Object,
            "array" => Self::Array,
            "reference" => Self::Reference,
            "component" => Self::Component,
            _ => Self::Custom(name),
        }
    }
}

impl From<PortType> for String {
    fn from(port_type: PortType) -> Self {
        match port_type {
            PortType::Any => "*".into(),
            PortType::Boolean => "boolean".into(),
            PortType::Number => "number".into(),
            PortType::String => "string".into(),
            PortType::Signal => "signal".into(),
            PortType::Object => "object".into(),
            PortType::Array => "array".into(),
            PortType::Reference => "reference".into(),
            PortType::Component => "component".into(),
            PortType::Custom(name) => name,
        }
    }
}

/// A named, typed port declared on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub name: String,
    pub plug: PlugDirection,
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Port {
    pub fn input(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            plug: PlugDirection::Input,
            port_type,
            default: None,
            unit: None,
        }
    }

    pub fn output(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            plug: PlugDirection::Output,
            port_type,
            default: None,
            unit: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}
