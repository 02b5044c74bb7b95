//! Node Records
//!
//! A node record is the declarative description of one node inside a
//! component: its type, parameters, tree position and dynamic ports. The
//! runtime builds live nodes from these records.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::port::Port;

/// Parameter name to JSON value, in declaration order.
pub type ParameterMap = IndexMap<String, serde_json::Value>;

/// Visual state name to the parameter overrides for that state.
pub type StateParameterMap = IndexMap<String, ParameterMap>;

/// Declarative description of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Unique within the owning component.
    pub id: String,

    /// A registered node type or the name of a component.
    pub type_name: String,

    pub parameters: ParameterMap,

    pub state_parameters: StateParameterMap,

    pub parent: Option<String>,

    pub children: Vec<String>,

    /// Dynamic ports declared on this particular node.
    pub ports: Vec<Port>,

    /// Name of the variant applied to this node, if any.
    pub variant: Option<String>,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            parameters: ParameterMap::new(),
            state_parameters: StateParameterMap::new(),
            parent: None,
            children: Vec::new(),
            ports: Vec::new(),
            variant: None,
        }
    }

    /// Effective parameters for a visual state: neutral values overlaid with
    /// the overrides of `state`.
    pub fn parameters_for_state(&self, state: Option<&str>) -> ParameterMap {
        let mut params = self.parameters.clone();
        if let Some(overrides) = state.and_then(|s| self.state_parameters.get(s)) {
            for (name, value) in overrides {
                params.insert(name.clone(), value.clone());
            }
        }
        params
    }
}

/// Nested node form used by the import document and by node-add deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDocument {
    pub id: String,

    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: ParameterMap,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub state_parameters: StateParameterMap,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDocument>,
}

impl NodeDocument {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            parameters: ParameterMap::new(),
            state_parameters: StateParameterMap::new(),
            ports: Vec::new(),
            variant: None,
            children: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_child(mut self, child: NodeDocument) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Flatten this subtree into records, parents before children.
    pub(crate) fn flatten(&self, parent: Option<&str>, out: &mut Vec<NodeRecord>) {
        out.push(NodeRecord {
            id: self.id.clone(),
            type_name: self.type_name.clone(),
            parameters: self.parameters.clone(),
            state_parameters: self.state_parameters.clone(),
            parent: parent.map(str::to_string),
            children: self.children.iter().map(|c| c.id.clone()).collect(),
            ports: self.ports.clone(),
            variant: self.variant.clone(),
        });
        for child in &self.children {
            child.flatten(Some(&self.id), out);
        }
    }
}
