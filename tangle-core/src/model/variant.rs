//! Variant Records
//!
//! A variant is a named parameter set shared by every node of one type that
//! opts into it. Like node records, variants carry per-visual-state overrides;
//! they also carry the transition curves used when switching states.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::node::{ParameterMap, StateParameterMap};

/// A shared, state-aware parameter overlay keyed by `(type_name, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantRecord {
    #[serde(rename = "typename")]
    pub type_name: String,

    pub name: String,

    #[serde(default)]
    pub parameters: ParameterMap,

    #[serde(default)]
    pub state_parameters: StateParameterMap,

    /// State name to per-parameter transition curves.
    #[serde(default)]
    pub state_transitions: IndexMap<String, serde_json::Value>,
}

impl VariantRecord {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            parameters: ParameterMap::new(),
            state_parameters: StateParameterMap::new(),
            state_transitions: IndexMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn matches(&self, type_name: &str, name: &str) -> bool {
        self.type_name == type_name && self.name == name
    }

    /// Parameters for a visual state, neutral values first.
    pub fn parameters_for_state(&self, state: Option<&str>) -> ParameterMap {
        let mut params = self.parameters.clone();
        if let Some(overrides) = state.and_then(|s| self.state_parameters.get(s)) {
            for (name, value) in overrides {
                params.insert(name.clone(), value.clone());
            }
        }
        params
    }

    /// Set or delete a parameter. `None` deletes.
    pub fn set_parameter(&mut self, name: &str, value: Option<serde_json::Value>, state: Option<&str>) {
        let target = match state {
            Some(state) => self.state_parameters.entry(state.to_string()).or_default(),
            None => &mut self.parameters,
        };
        match value {
            Some(value) => {
                target.insert(name.to_string(), value);
            }
            None => {
                target.shift_remove(name);
            }
        }
    }
}
