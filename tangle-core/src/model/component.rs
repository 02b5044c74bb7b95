//! Component Records
//!
//! A component is a reusable, named subgraph: a tree of node records, the
//! connections between their ports, and the boundary ports it exposes to
//! instances of itself.
//!
//! # Invariants
//!
//! - Every connection references nodes that exist in this component.
//! - Every id in `roots` names a node without a parent.
//! - A node's `children` and each child's `parent` agree.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::node::{NodeDocument, NodeRecord};
use super::port::{PlugDirection, Port};
use crate::error::GraphError;

/// Type name of the placeholder exposing boundary inputs inside a component.
pub const COMPONENT_INPUTS: &str = "Component Inputs";

/// Type name of the placeholder collecting boundary outputs inside a component.
pub const COMPONENT_OUTPUTS: &str = "Component Outputs";

/// Type name of the placeholder where an instance's visual children attach.
pub const COMPONENT_CHILDREN: &str = "Component Children";

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub from_id: String,
    #[serde(rename = "fromProperty")]
    pub from_port: String,
    pub to_id: String,
    #[serde(rename = "toProperty")]
    pub to_port: String,
}

impl ConnectionRecord {
    pub fn new(
        from_id: impl Into<String>,
        from_port: impl Into<String>,
        to_id: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            from_port: from_port.into(),
            to_id: to_id.into(),
            to_port: to_port.into(),
        }
    }

    pub fn involves_node(&self, node_id: &str) -> bool {
        self.from_id == node_id || self.to_id == node_id
    }
}

impl std::fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from_id, self.from_port, self.to_id, self.to_port
        )
    }
}

/// Serialized form of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDocument {
    pub name: String,

    #[serde(default)]
    pub ports: Vec<Port>,

    /// Root-level node trees, in root order.
    #[serde(default, alias = "roots")]
    pub nodes: Vec<NodeDocument>,

    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ComponentDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_node(mut self, node: NodeDocument) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionRecord) -> Self {
        self.connections.push(connection);
        self
    }
}

/// Declarative description of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRecord {
    pub name: String,
    nodes: IndexMap<String, NodeRecord>,
    connections: Vec<ConnectionRecord>,
    roots: Vec<String>,
    ports: Vec<Port>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ComponentRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            connections: Vec::new(),
            roots: Vec::new(),
            ports: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Build a record from its document form.
    ///
    /// Connections whose endpoints are missing are dropped with a warning so
    /// the record keeps its invariants.
    pub fn from_document(doc: ComponentDocument) -> Result<Self, GraphError> {
        let mut record = Self::new(doc.name);
        record.ports = doc.ports;
        record.metadata = doc.metadata;
        for root in &doc.nodes {
            record.insert_subtree(root, None, None)?;
        }
        for connection in doc.connections {
            if let Err(err) = record.add_connection(connection) {
                tracing::warn!(component = %record.name, error = %err, "dropping malformed connection");
            }
        }
        Ok(record)
    }

    pub fn to_document(&self) -> ComponentDocument {
        ComponentDocument {
            name: self.name.clone(),
            ports: self.ports.clone(),
            nodes: self.roots.iter().filter_map(|id| self.node_document(id)).collect(),
            connections: self.connections.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn node_document(&self, id: &str) -> Option<NodeDocument> {
        let record = self.nodes.get(id)?;
        Some(NodeDocument {
            id: record.id.clone(),
            type_name: record.type_name.clone(),
            parameters: record.parameters.clone(),
            state_parameters: record.state_parameters.clone(),
            ports: record.ports.clone(),
            variant: record.variant.clone(),
            children: record
                .children
                .iter()
                .filter_map(|child| self.node_document(child))
                .collect(),
        })
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Result<&mut NodeRecord, GraphError> {
        let component = &self.name;
        self.nodes.get_mut(id).ok_or_else(|| GraphError::NodeNotFound {
            component: component.clone(),
            node: id.to_string(),
        })
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.plug.is_input())
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.plug.is_output())
    }

    /// Node ids in tree order: each root followed by its descendants.
    pub fn tree_order(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.collect_preorder(root, &mut out);
        }
        out
    }

    fn collect_preorder(&self, id: &str, out: &mut Vec<String>) {
        out.push(id.to_string());
        if let Some(node) = self.nodes.get(id) {
            for child in &node.children {
                self.collect_preorder(child, out);
            }
        }
    }

    /// Ids of `id` and its descendants, children before their parent.
    pub fn subtree_postorder(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_postorder(id, &mut out);
        out
    }

    fn collect_postorder(&self, id: &str, out: &mut Vec<String>) {
        if let Some(node) = self.nodes.get(id) {
            for child in &node.children {
                self.collect_postorder(child, out);
            }
        }
        out.push(id.to_string());
    }

    fn is_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = self.nodes.get(candidate).and_then(|n| n.parent.clone());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        false
    }

    /// Insert a node subtree under `parent` (or as a root) at `index`.
    ///
    /// Returns the inserted ids, parents before children.
    pub(crate) fn insert_subtree(
        &mut self,
        doc: &NodeDocument,
        parent: Option<&str>,
        index: Option<usize>,
    ) -> Result<Vec<String>, GraphError> {
        let mut records = Vec::new();
        doc.flatten(parent, &mut records);

        for record in &records {
            if self.nodes.contains_key(&record.id) {
                return Err(GraphError::DuplicateNode {
                    component: self.name.clone(),
                    node: record.id.clone(),
                });
            }
        }
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(GraphError::NodeNotFound {
                    component: self.name.clone(),
                    node: parent.to_string(),
                });
            }
        }

        let siblings = match parent {
            Some(parent) => &mut self.node_mut(parent)?.children,
            None => &mut self.roots,
        };
        let at = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(at, doc.id.clone());

        let ids = records.iter().map(|r| r.id.clone()).collect();
        for record in records {
            self.nodes.insert(record.id.clone(), record);
        }
        Ok(ids)
    }

    /// Remove a node and its descendants.
    ///
    /// Returns the connections that touched the subtree, followed by the
    /// removed ids with children before their parent.
    pub(crate) fn remove_subtree(
        &mut self,
        id: &str,
    ) -> Result<(Vec<ConnectionRecord>, Vec<String>), GraphError> {
        let parent = self.node_mut(id)?.parent.clone();
        let removed = self.subtree_postorder(id);

        let mut touching = Vec::new();
        self.connections.retain(|c| {
            let hit = removed.iter().any(|r| c.involves_node(r));
            if hit {
                touching.push(c.clone());
            }
            !hit
        });

        match parent {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|c| c != id);
                }
            }
            None => self.roots.retain(|r| r != id),
        }
        for removed_id in &removed {
            self.nodes.shift_remove(removed_id);
        }
        Ok((touching, removed))
    }

    /// Add a connection; returns `false` when it already existed.
    pub(crate) fn add_connection(&mut self, connection: ConnectionRecord) -> Result<bool, GraphError> {
        for endpoint in [&connection.from_id, &connection.to_id] {
            if !self.nodes.contains_key(endpoint) {
                return Err(GraphError::MissingEndpoint {
                    component: self.name.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        if self.connections.contains(&connection) {
            return Ok(false);
        }
        self.connections.push(connection);
        Ok(true)
    }

    pub(crate) fn remove_connection(&mut self, connection: &ConnectionRecord) -> Result<(), GraphError> {
        let before = self.connections.len();
        self.connections.retain(|c| c != connection);
        if self.connections.len() == before {
            return Err(GraphError::ConnectionNotFound(connection.to_string()));
        }
        Ok(())
    }

    /// Move a node under `parent` (or to the root list) at `index`.
    ///
    /// Returns the previous parent.
    pub(crate) fn reparent(
        &mut self,
        id: &str,
        parent: Option<&str>,
        index: Option<usize>,
    ) -> Result<Option<String>, GraphError> {
        let old_parent = self.node_mut(id)?.parent.clone();
        if let Some(parent) = parent {
            if !self.nodes.contains_key(parent) {
                return Err(GraphError::NodeNotFound {
                    component: self.name.clone(),
                    node: parent.to_string(),
                });
            }
            if parent == id || self.is_descendant(parent, id) {
                return Err(GraphError::InvalidReparent {
                    node: id.to_string(),
                    parent: parent.to_string(),
                });
            }
        }

        match &old_parent {
            Some(old) => self.node_mut(old)?.children.retain(|c| c != id),
            None => self.roots.retain(|r| r != id),
        }
        let siblings = match parent {
            Some(parent) => &mut self.node_mut(parent)?.children,
            None => &mut self.roots,
        };
        let at = index.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(at, id.to_string());
        self.node_mut(id)?.parent = parent.map(str::to_string);
        Ok(old_parent)
    }

    pub(crate) fn add_port(&mut self, port: Port) -> Result<(), GraphError> {
        if self.port(&port.name).is_some() {
            return Err(GraphError::DuplicatePort(port.name));
        }
        self.ports.push(port);
        Ok(())
    }

    pub(crate) fn remove_port(&mut self, name: &str) -> Result<Port, GraphError> {
        let index = self
            .ports
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| GraphError::PortNotFound(name.to_string()))?;
        Ok(self.ports.remove(index))
    }

    pub(crate) fn rename_port(&mut self, old: &str, new: &str) -> Result<PlugDirection, GraphError> {
        if self.port(new).is_some() {
            return Err(GraphError::DuplicatePort(new.to_string()));
        }
        let port = self
            .ports
            .iter_mut()
            .find(|p| p.name == old)
            .ok_or_else(|| GraphError::PortNotFound(old.to_string()))?;
        port.name = new.to_string();
        Ok(port.plug)
    }

    /// Connections that use boundary port `port` of a component: either on an
    /// instance node of type `component` here, or on this component's own
    /// placeholders when `component` is this component.
    pub(crate) fn connections_using_boundary_port(
        &self,
        component: &str,
        port: &str,
    ) -> Vec<ConnectionRecord> {
        let is_type = |id: &str, type_name: &str| {
            self.nodes.get(id).is_some_and(|n| n.type_name == type_name)
        };
        let own = self.name == component;
        self.connections
            .iter()
            .filter(|c| {
                let instance_side = (c.to_port == port && is_type(&c.to_id, component))
                    || (c.from_port == port && is_type(&c.from_id, component));
                let placeholder_side = own
                    && ((c.from_port == port && is_type(&c.from_id, COMPONENT_INPUTS))
                        || (c.to_port == port && is_type(&c.to_id, COMPONENT_OUTPUTS)));
                instance_side || placeholder_side
            })
            .cloned()
            .collect()
    }

    /// Rewrite the connections that use boundary port `old` of `component`
    /// so they use `new`. Returns `(before, after)` pairs.
    pub(crate) fn rename_boundary_port_connections(
        &mut self,
        component: &str,
        old: &str,
        new: &str,
    ) -> Vec<(ConnectionRecord, ConnectionRecord)> {
        let affected = self.connections_using_boundary_port(component, old);
        let own = self.name == component;
        let mut rewritten = Vec::with_capacity(affected.len());
        for before in affected {
            let type_of = |id: &str| self.nodes.get(id).map(|n| n.type_name.as_str());
            let mut after = before.clone();
            let to_type = type_of(&before.to_id);
            if before.to_port == old
                && (to_type == Some(component) || (own && to_type == Some(COMPONENT_OUTPUTS)))
            {
                after.to_port = new.to_string();
            }
            let from_type = type_of(&before.from_id);
            if before.from_port == old
                && (from_type == Some(component) || (own && from_type == Some(COMPONENT_INPUTS)))
            {
                after.from_port = new.to_string();
            }
            rewritten.push((before, after));
        }
        for (before, after) in &rewritten {
            if let Some(slot) = self.connections.iter_mut().find(|c| *c == before) {
                *slot = after.clone();
            }
        }
        rewritten
    }

    /// Rename every node of type `old` to `new`. Returns how many changed.
    pub(crate) fn rename_instances(&mut self, old: &str, new: &str) -> usize {
        let mut renamed = 0;
        for node in self.nodes.values_mut() {
            if node.type_name == old {
                node.type_name = new.to_string();
                renamed += 1;
            }
        }
        renamed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ComponentRecord {
        let doc = ComponentDocument::new("Main")
            .with_node(
                NodeDocument::new("group", "Group")
                    .with_child(NodeDocument::new("a", "Text"))
                    .with_child(NodeDocument::new("b", "Text")),
            )
            .with_node(NodeDocument::new("num", "Number"))
            .with_connection(ConnectionRecord::new("num", "value", "a", "text"))
            .with_connection(ConnectionRecord::new("num", "value", "b", "text"))
            .with_connection(ConnectionRecord::new("num", "value", "ghost", "text"));
        ComponentRecord::from_document(doc).unwrap()
    }

    #[test]
    fn import_drops_connections_with_missing_endpoints() {
        let record = sample();
        assert_eq!(record.connections().len(), 2);
        assert_eq!(record.roots(), ["group", "num"]);
        assert_eq!(record.tree_order(), ["group", "a", "b", "num"]);
    }

    #[test]
    fn remove_subtree_cascades() {
        let mut record = sample();
        let (touching, removed) = record.remove_subtree("group").unwrap();

        assert_eq!(removed, ["a", "b", "group"]);
        assert_eq!(touching.len(), 2);
        assert!(record.connections().is_empty());
        assert_eq!(record.roots(), ["num"]);
        assert_eq!(record.node_count(), 1);
    }

    #[test]
    fn reparent_moves_between_roots_and_children() {
        let mut record = sample();
        let old = record.reparent("num", Some("group"), Some(0)).unwrap();
        assert_eq!(old, None);
        assert_eq!(record.node("group").unwrap().children, ["num", "a", "b"]);
        assert_eq!(record.roots(), ["group"]);

        let err = record.reparent("group", Some("a"), None).unwrap_err();
        assert!(matches!(err, GraphError::InvalidReparent { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut record = sample();
        let err = record
            .insert_subtree(&NodeDocument::new("a", "Text"), None, None)
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[test]
    fn document_round_trip_preserves_tree() {
        let record = sample();
        let again = ComponentRecord::from_document(record.to_document()).unwrap();
        assert_eq!(again, record);
    }
}
