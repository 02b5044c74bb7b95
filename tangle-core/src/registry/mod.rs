//! Node Registry
//!
//! Maps node type names to their definitions. The runtime consults the
//! registry when it instantiates a node record; names that are not
//! registered are looked up as components instead.

mod definition;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

pub use definition::{
    GetFn, HookFn, InputDef, MethodFn, NodeDefinition, NumberedInput, OutputDef, SetFn, SetupFn,
};

/// Registered node types, in registration order.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    types: IndexMap<String, Arc<NodeDefinition>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one of the same name.
    pub fn register(&mut self, definition: NodeDefinition) -> Arc<NodeDefinition> {
        let definition = Arc::new(definition);
        if self
            .types
            .insert(definition.name.clone(), definition.clone())
            .is_some()
        {
            debug!(type_name = %definition.name, "replaced node definition");
        }
        definition
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<NodeDefinition>> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Definitions in `category`, in registration order.
    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a NodeDefinition> {
        self.types
            .values()
            .filter(move |d| d.category == category)
            .map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortType;

    #[test]
    fn register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeDefinition::new("Number").category("Math"));
        registry.register(NodeDefinition::new("Text").category("UI"));

        assert!(registry.contains("Number"));
        assert!(registry.get("Missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Number", "Text"]);
        assert_eq!(registry.in_category("Math").count(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn re_registering_replaces_definition() {
        let mut registry = NodeRegistry::new();
        registry.register(NodeDefinition::new("Number"));
        registry.register(
            NodeDefinition::new("Number").input("value", InputDef::new(PortType::Number)),
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get("Number").unwrap().resolve_input("value").is_some());
    }
}
