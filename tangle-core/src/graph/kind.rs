//! Node Kinds
//!
//! The set of node behaviors is closed: nodes built from a registry
//! definition, the three component placeholders, and component instances.

use std::sync::Arc;

use indexmap::IndexMap;

use super::node::{NodeKey, ScopeId};
use crate::model::{COMPONENT_CHILDREN, COMPONENT_INPUTS, COMPONENT_OUTPUTS};
use crate::registry::NodeDefinition;
use crate::value::Value;

/// Behavior of a live node.
#[derive(Debug)]
pub enum NodeKind {
    /// Built from a registered [`NodeDefinition`].
    Defined(Arc<NodeDefinition>),

    /// Exposes the owning instance's input values as outputs.
    ComponentInputs,

    /// Forwards its inputs to the owning instance's outputs.
    ComponentOutputs,

    /// Marks where an instance's visual children are attached.
    ComponentChildren,

    /// A node whose type is a component; owns a child scope.
    ComponentInstance(ComponentInstance),
}

impl NodeKind {
    /// Placeholder kind for a reserved type name, if it is one.
    pub fn placeholder(type_name: &str) -> Option<NodeKind> {
        match type_name {
            COMPONENT_INPUTS => Some(NodeKind::ComponentInputs),
            COMPONENT_OUTPUTS => Some(NodeKind::ComponentOutputs),
            COMPONENT_CHILDREN => Some(NodeKind::ComponentChildren),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Defined(_) => "defined",
            NodeKind::ComponentInputs => "component-inputs",
            NodeKind::ComponentOutputs => "component-outputs",
            NodeKind::ComponentChildren => "component-children",
            NodeKind::ComponentInstance(_) => "component-instance",
        }
    }

    pub fn definition(&self) -> Option<&Arc<NodeDefinition>> {
        match self {
            NodeKind::Defined(def) => Some(def),
            _ => None,
        }
    }

    pub fn instance(&self) -> Option<&ComponentInstance> {
        match self {
            NodeKind::ComponentInstance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn instance_mut(&mut self) -> Option<&mut ComponentInstance> {
        match self {
            NodeKind::ComponentInstance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            NodeKind::ComponentInputs | NodeKind::ComponentOutputs | NodeKind::ComponentChildren
        )
    }
}

/// State of a component instance node.
#[derive(Debug, Default)]
pub struct ComponentInstance {
    /// Name of the instantiated component.
    pub(crate) component: String,

    /// Scope holding the component's nodes; set once the scope is built.
    pub(crate) child_scope: Option<ScopeId>,

    /// Last value written to each boundary input.
    pub(crate) input_values: IndexMap<String, Value>,

    /// Last value forwarded from a boundary output placeholder.
    pub(crate) output_values: IndexMap<String, Value>,

    /// Visual children declared on the instance, in order.
    pub(crate) children: Vec<NodeKey>,

    /// Children placeholder the visual children are attached to.
    pub(crate) children_placeholder: Option<NodeKey>,
}

impl ComponentInstance {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn child_scope(&self) -> Option<ScopeId> {
        self.child_scope
    }

    pub fn input_value(&self, port: &str) -> Option<&Value> {
        self.input_values.get(port)
    }

    pub fn output_value(&self, port: &str) -> Value {
        self.output_values.get(port).cloned().unwrap_or_default()
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn children_placeholder(&self) -> Option<NodeKey> {
        self.children_placeholder
    }
}
