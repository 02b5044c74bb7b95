//! Scopes
//!
//! A scope is one live instance of a component. It owns the nodes built
//! from the component's records, the wires built from its connections and
//! the event receivers registered on it. Scopes form a tree: a component
//! instance node owns the scope of the component it instantiates.
//!
//! # Building
//!
//! A scope is built in two phases with dirty propagation suppressed: every
//! node is created in tree order first, then every connection is wired.
//! Only then are the nodes marked dirty during the build released to the
//! worklist.
//!
//! # Removal
//!
//! Removing a node removes its subtree depth-first. All connections touching
//! the subtree are torn down before any node goes away; instance nodes
//! dispose their scopes with them.

use indexmap::IndexMap;
use tracing::{debug, error, warn};

use super::events::Receiver;
use super::{ExecutionContext, RuntimeEvent};
use crate::error::{GraphError, RuntimeError};
use crate::graph::{ComponentInstance, Node, NodeId, NodeIo, NodeKey, NodeKind, ScopeId};
use crate::model::{ComponentRecord, ConnectionRecord, NodeRecord};
use crate::registry::{InputDef, OutputDef};

/// A live connection and the record it was built from.
#[derive(Debug, Clone)]
pub(crate) struct Wire {
    pub(crate) record: ConnectionRecord,
    pub(crate) source: NodeKey,
    pub(crate) target: NodeKey,
}

/// One live instance of a component.
pub struct Scope {
    pub(crate) id: ScopeId,
    pub(crate) component: String,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) owner: Option<NodeKey>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) nodes: IndexMap<NodeId, Option<Node>>,
    pub(crate) record_ids: IndexMap<String, NodeId>,
    pub(crate) roots: Vec<NodeId>,
    pub(crate) wires: Vec<Wire>,
    pub(crate) receivers: Vec<Receiver>,
}

impl Scope {
    fn new(id: ScopeId, component: &str, parent: Option<ScopeId>, owner: Option<NodeKey>) -> Self {
        Self {
            id,
            component: component.to_string(),
            parent,
            owner,
            children: Vec::new(),
            nodes: IndexMap::new(),
            record_ids: IndexMap::new(),
            roots: Vec::new(),
            wires: Vec::new(),
            receivers: Vec::new(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// The component instance node that owns this scope.
    pub fn owner(&self) -> Option<NodeKey> {
        self.owner
    }

    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    pub fn node_key(&self, record_id: &str) -> Option<NodeKey> {
        self.record_ids
            .get(record_id)
            .map(|node| NodeKey::new(self.id, *node))
    }

    pub fn node_keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys().map(|node| NodeKey::new(self.id, *node))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn roots(&self) -> Vec<NodeKey> {
        self.roots.iter().map(|n| NodeKey::new(self.id, *n)).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.wires.len()
    }

    /// Node ids in tree order, parents before children.
    pub(crate) fn tree_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(Some(node)) = self.nodes.get(&id) {
                stack.extend(node.tree_children.iter().rev().copied());
            }
        }
        order
    }

    /// Subtree of `id`, children before parents.
    pub(crate) fn subtree_postorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(Some(node)) = self.nodes.get(&id) {
                stack.extend(node.tree_children.iter().rev().map(|c| (*c, false)));
            }
        }
        order
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("component", &self.component)
            .field("parent", &self.parent)
            .field("owner", &self.owner)
            .field("nodes", &self.nodes.len())
            .field("wires", &self.wires.len())
            .finish()
    }
}

impl ExecutionContext {
    /// Instantiate `component` as a top-level scope.
    pub fn create_root_scope(&mut self, component: &str) -> Result<ScopeId, RuntimeError> {
        self.create_scope(component, None, None)
    }

    /// Instantiate `component`, optionally as the child scope of an instance.
    pub(crate) fn create_scope(
        &mut self,
        component: &str,
        parent: Option<ScopeId>,
        owner: Option<NodeKey>,
    ) -> Result<ScopeId, RuntimeError> {
        let record = self
            .graph
            .component(component)
            .cloned()
            .ok_or_else(|| GraphError::ComponentNotFound(component.to_string()))?;

        let id = self.ids.scope_id();
        self.scopes.insert(id, Scope::new(id, component, parent, owner));
        if let Some(parent) = parent.and_then(|p| self.scopes.get_mut(&p)) {
            parent.children.push(id);
        }
        debug!(scope = id.raw(), component = %component, "creating scope");

        self.scheduler.suppress_propagation();
        let order = record.tree_order();
        self.create_nodes(id, &record, &order);
        self.wire_all(id, record.connections());
        self.scheduler.resume_propagation();

        if let Some(owner) = owner {
            if let Some(instance) = self.node_mut(owner).and_then(|n| n.kind.instance_mut()) {
                instance.child_scope = Some(id);
            }
            self.refresh_children_placeholder(owner);
        }

        self.events.emit(&RuntimeEvent::ScopeCreated {
            scope: id,
            component: component.to_string(),
        });
        Ok(id)
    }

    /// Create the nodes for `ids` (parents first) and link them into the
    /// scope's tree. Failures are logged per node.
    pub(crate) fn create_nodes(&mut self, scope: ScopeId, record: &ComponentRecord, ids: &[String]) {
        let mut created = Vec::with_capacity(ids.len());
        for record_id in ids {
            let Some(node_record) = record.node(record_id) else {
                continue;
            };
            match self.create_node(scope, record, node_record) {
                Ok(key) => created.push((key, node_record)),
                Err(err) => {
                    error!(scope = scope.raw(), node = %record_id, error = %err, "failed to create node")
                }
            }
        }

        for (key, node_record) in created {
            let parent = node_record.parent.as_deref().and_then(|p| {
                let index = record
                    .node(p)
                    .and_then(|parent| parent.children.iter().position(|c| *c == node_record.id));
                self.find_node(scope, p).map(|key| (key, index))
            });
            self.link(key, parent);
        }
    }

    /// Attach `key` under `parent` in both trees, or make it a root.
    pub(crate) fn link(&mut self, key: NodeKey, parent: Option<(NodeKey, Option<usize>)>) {
        match parent {
            Some((parent, index)) => {
                if let Some(node) = self.node_mut(parent) {
                    let at = index.unwrap_or(node.tree_children.len()).min(node.tree_children.len());
                    node.tree_children.insert(at, key.node);
                }
                if let Some(node) = self.node_mut(key) {
                    node.tree_parent = Some(parent.node);
                }
                self.add_visual_child(parent, key, index);
            }
            None => {
                let Some(scope) = self.scopes.get_mut(&key.scope) else {
                    return;
                };
                let index = self
                    .graph
                    .component(&scope.component)
                    .and_then(|c| {
                        let id = scope.nodes.get(&key.node)?.as_ref()?.record_id.clone();
                        c.roots().iter().position(|r| *r == id)
                    })
                    .unwrap_or(scope.roots.len())
                    .min(scope.roots.len());
                scope.roots.insert(index, key.node);
                if let Some(node) = self.node_mut(key) {
                    node.tree_parent = None;
                }
                self.roots_changed(key.scope);
            }
        }
    }

    /// Detach `key` from its tree parent, or from the roots.
    pub(crate) fn unlink(&mut self, key: NodeKey) {
        let parent = self.node(key).and_then(|n| n.tree_parent);
        match parent {
            Some(parent) => {
                let parent = NodeKey::new(key.scope, parent);
                if let Some(node) = self.node_mut(parent) {
                    node.tree_children.retain(|c| *c != key.node);
                    if let Some(instance) = node.kind.instance_mut() {
                        instance.children.retain(|c| *c != key);
                    }
                }
            }
            None => {
                if let Some(scope) = self.scopes.get_mut(&key.scope) {
                    scope.roots.retain(|r| *r != key.node);
                }
                self.roots_changed(key.scope);
            }
        }
        self.detach_visual(key);
        if let Some(node) = self.node_mut(key) {
            node.tree_parent = None;
        }
    }

    fn node_kind_for(&self, type_name: &str) -> Result<NodeKind, RuntimeError> {
        if let Some(def) = self.registry.get(type_name) {
            return Ok(NodeKind::Defined(def.clone()));
        }
        if let Some(kind) = NodeKind::placeholder(type_name) {
            return Ok(kind);
        }
        if self.graph.has_component(type_name) {
            return Ok(NodeKind::ComponentInstance(ComponentInstance::new(type_name)));
        }
        Err(RuntimeError::UnknownType(type_name.to_string()))
    }

    /// Register the ports a node starts with.
    fn register_ports(&self, node: &mut Node, component: &ComponentRecord, record: &NodeRecord) {
        match &node.kind {
            NodeKind::Defined(def) => {
                let def = def.clone();
                for (name, input) in def.inputs() {
                    node.register_input(name, input.clone());
                }
                for (name, output) in def.outputs() {
                    node.register_output(name, output.clone());
                }
            }
            NodeKind::ComponentInputs => {
                for port in component.input_ports() {
                    node.register_output(port.name.clone(), OutputDef::new(port.port_type.clone()));
                }
            }
            NodeKind::ComponentOutputs => {
                for port in component.output_ports() {
                    node.register_input(port.name.clone(), InputDef::new(port.port_type.clone()));
                }
            }
            NodeKind::ComponentChildren => {}
            NodeKind::ComponentInstance(instance) => {
                let Some(child) = self.graph.component(&instance.component) else {
                    return;
                };
                let (inputs, outputs): (Vec<_>, Vec<_>) = (
                    child.input_ports().cloned().collect(),
                    child.output_ports().cloned().collect(),
                );
                for port in inputs {
                    let mut def = InputDef::new(port.port_type.clone());
                    def.default = port.default.clone();
                    def.unit = port.unit.clone();
                    node.register_input(port.name, def);
                }
                for port in outputs {
                    node.register_output(port.name, OutputDef::new(port.port_type));
                }
            }
        }

        // Ports declared on the record itself.
        for port in &record.ports {
            if port.plug.is_input() && !node.inputs.contains_key(&port.name) {
                let mut def = InputDef::new(port.port_type.clone());
                def.default = port.default.clone();
                def.unit = port.unit.clone();
                node.register_input(port.name.clone(), def);
            }
            if port.plug.is_output() {
                node.register_output(port.name.clone(), OutputDef::new(port.port_type.clone()));
            }
        }
    }

    /// Build one node from its record and add it to `scope`.
    pub(crate) fn create_node(
        &mut self,
        scope: ScopeId,
        component: &ComponentRecord,
        record: &NodeRecord,
    ) -> Result<NodeKey, RuntimeError> {
        if self
            .scopes
            .get(&scope)
            .ok_or(RuntimeError::ScopeNotFound(scope.raw()))?
            .record_ids
            .contains_key(&record.id)
        {
            return Err(GraphError::DuplicateNode {
                component: component.name.clone(),
                node: record.id.clone(),
            }
            .into());
        }

        let kind = self.node_kind_for(&record.type_name)?;
        let key = NodeKey::new(scope, self.ids.node_id());
        let mut node = Node::new(key, &record.id, &record.type_name, kind);
        self.register_ports(&mut node, component, record);

        // Inputs placeholders start from the owner's current input values.
        if matches!(node.kind, NodeKind::ComponentInputs) {
            let owner_inputs = self
                .scopes
                .get(&scope)
                .and_then(|s| s.owner)
                .and_then(|owner| self.node(owner))
                .and_then(|n| n.kind.instance())
                .map(|i| i.input_values.clone())
                .unwrap_or_default();
            for (port, value) in owner_inputs {
                node.register_output(port.clone(), OutputDef::new(crate::model::PortType::Any));
                node.internals.set(port, value);
            }
        }

        if let Some(hook) = node.kind.definition().and_then(|d| d.initialize_hook()).cloned() {
            let mut io = NodeIo::new(&mut node, None, self.scheduler.frame());
            hook(&mut io);
            let effects = io.into_effects();
            self.apply_effects(&mut node, effects);
        }

        let instance_of = node.kind.instance().map(|i| i.component.clone());
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.record_ids.insert(record.id.clone(), key.node);
            scope.nodes.insert(key.node, Some(node));
        }

        if let Some(child) = instance_of {
            if let Err(err) = self.create_scope(&child, Some(scope), Some(key)) {
                error!(component = %child, error = %err, "failed to instantiate component");
            }
        }

        self.apply_parameters(key);
        Ok(key)
    }

    /// Remove the node built from `record_id` and its subtree.
    ///
    /// Returns the removed record ids, children first.
    pub(crate) fn remove_node(&mut self, scope: ScopeId, record_id: &str) -> Result<Vec<String>, RuntimeError> {
        let root = self
            .find_node(scope, record_id)
            .ok_or_else(|| RuntimeError::NodeNotFound(format!("{record_id} in scope {}", scope.raw())))?;
        let order: Vec<NodeKey> = self
            .scopes
            .get(&scope)
            .map(|s| s.subtree_postorder(root.node))
            .unwrap_or_default()
            .into_iter()
            .map(|node| NodeKey::new(scope, node))
            .collect();

        self.unwire_nodes(scope, &order);
        let mut ids = Vec::with_capacity(order.len());
        for key in order {
            if let Some(id) = self.destroy_node(key) {
                ids.push(id);
            }
        }

        debug!(scope = scope.raw(), node = %record_id, removed = ids.len(), "removed node subtree");
        self.events.emit(&RuntimeEvent::NodeRemoved {
            scope,
            record_id: record_id.to_string(),
            ids: ids.clone(),
        });
        Ok(ids)
    }

    /// Take one node out of its scope, disposing anything it owns.
    ///
    /// Its connections must already be torn down.
    fn destroy_node(&mut self, key: NodeKey) -> Option<String> {
        self.unlink(key);

        // Visual children redirected here from elsewhere lose their parent.
        let orphans = self.node(key).map(|n| n.visual_children.clone()).unwrap_or_default();
        for orphan in orphans {
            if let Some(node) = self.node_mut(orphan) {
                node.visual_parent = None;
            }
        }

        let mut node = self.checkout(key)?;
        if let Some(child) = node.kind.instance().and_then(|i| i.child_scope) {
            self.dispose_scope(child);
        }
        if let Some(hook) = node.kind.definition().and_then(|d| d.delete_hook()).cloned() {
            let mut io = NodeIo::new(&mut node, None, self.scheduler.frame());
            hook(&mut io);
        }

        if let Some(scope) = self.scopes.get_mut(&key.scope) {
            scope.nodes.shift_remove(&key.node);
            scope.record_ids.shift_remove(&node.record_id);
        }
        self.scheduler.forget(key);
        self.deferred.remove(&key);

        if matches!(node.kind, NodeKind::ComponentChildren) {
            if let Some(owner) = self.scopes.get(&key.scope).and_then(|s| s.owner) {
                self.refresh_children_placeholder(owner);
            }
        }
        Some(node.record_id)
    }

    /// Tear down a scope and everything below it.
    pub fn dispose_scope(&mut self, id: ScopeId) {
        let Some(scope) = self.scopes.get(&id) else {
            return;
        };
        let mut order = scope.tree_order();
        order.reverse();
        // Nodes that never made it into the tree.
        let stray: Vec<NodeId> = scope.nodes.keys().filter(|n| !order.contains(n)).copied().collect();
        order.extend(stray);
        let keys: Vec<NodeKey> = order.into_iter().map(|n| NodeKey::new(id, n)).collect();

        self.unwire_nodes(id, &keys);
        for key in keys {
            self.destroy_node(key);
        }

        let Some(scope) = self.scopes.shift_remove(&id) else {
            return;
        };
        if let Some(parent) = scope.parent.and_then(|p| self.scopes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in scope.children {
            warn!(scope = child.raw(), "disposing scope left behind by its owner");
            self.dispose_scope(child);
        }
        debug!(scope = id.raw(), component = %scope.component, "disposed scope");
        self.events.emit(&RuntimeEvent::ScopeDisposed {
            scope: id,
            component: scope.component,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::super::test_support::registry;
    use super::*;
    use crate::model::{ComponentDocument, GraphDocument, GraphModel, NodeDocument};
    use crate::value::Value;

    fn context(components: Vec<ComponentDocument>) -> ExecutionContext {
        let graph = GraphModel::import(GraphDocument {
            components,
            ..GraphDocument::default()
        })
        .unwrap();
        ExecutionContext::with_registry(graph, registry())
    }

    #[test]
    fn builds_nodes_in_tree_order() {
        let app = ComponentDocument::new("App").with_node(
            NodeDocument::new("root", "Group")
                .with_child(NodeDocument::new("a", "Text"))
                .with_child(NodeDocument::new("b", "Group").with_child(NodeDocument::new("c", "Text"))),
        );
        let mut ctx = context(vec![app]);
        let scope = ctx.create_root_scope("App").unwrap();

        let s = ctx.scope(scope).unwrap();
        let order: Vec<String> = s
            .tree_order()
            .into_iter()
            .map(|n| ctx.node(NodeKey::new(scope, n)).unwrap().record_id().to_string())
            .collect();
        assert_eq!(order, vec!["root", "a", "b", "c"]);

        let root = ctx.find_node(scope, "root").unwrap();
        let b = ctx.find_node(scope, "b").unwrap();
        let c = ctx.find_node(scope, "c").unwrap();
        assert_eq!(ctx.node(c).unwrap().visual_parent(), Some(b));
        assert_eq!(ctx.node(root).unwrap().visual_children().len(), 2);
        assert_eq!(ctx.scope(scope).unwrap().roots(), vec![root]);
    }

    #[test]
    fn unknown_types_fail_only_their_node() {
        let app = ComponentDocument::new("App")
            .with_node(NodeDocument::new("ok", "Number").with_parameter("value", json!(1)))
            .with_node(NodeDocument::new("bad", "DoesNotExist"))
            .with_connection(ConnectionRecord::new("bad", "x", "ok", "value"));
        let mut ctx = context(vec![app]);
        let scope = ctx.create_root_scope("App").unwrap();
        ctx.update();

        assert!(ctx.find_node(scope, "bad").is_none());
        let ok = ctx.find_node(scope, "ok").unwrap();
        assert_eq!(ctx.output_value(ok, "result"), Some(Value::number(1.0)));
        assert_eq!(ctx.scope(scope).unwrap().connection_count(), 0);
    }

    #[test]
    fn no_node_evaluates_before_wiring_completes() {
        let app = ComponentDocument::new("App")
            .with_node(NodeDocument::new("a", "Number").with_parameter("value", json!(4)))
            .with_node(NodeDocument::new("b", "Number"))
            .with_connection(ConnectionRecord::new("a", "result", "b", "value"));
        let mut ctx = context(vec![app]);
        let scope = ctx.create_root_scope("App").unwrap();

        // Nothing has been evaluated yet; both nodes wait on the worklist.
        let a = ctx.find_node(scope, "a").unwrap();
        assert_eq!(ctx.node(a).unwrap().internals().number("runs"), 0.0);
        ctx.update();
        let b = ctx.find_node(scope, "b").unwrap();
        assert_eq!(ctx.output_value(b, "result"), Some(Value::number(4.0)));
        assert_eq!(ctx.node(b).unwrap().internals().number("runs"), 1.0);
    }

    #[test]
    fn removal_is_depth_first_and_reported_once() {
        let app = ComponentDocument::new("App")
            .with_node(
                NodeDocument::new("root", "Group")
                    .with_child(NodeDocument::new("x", "Number"))
                    .with_child(NodeDocument::new("y", "Group").with_child(NodeDocument::new("z", "Number"))),
            )
            .with_node(NodeDocument::new("sink", "Add"))
            .with_connection(ConnectionRecord::new("z", "result", "sink", "a"));
        let mut ctx = context(vec![app]);
        let scope = ctx.create_root_scope("App").unwrap();
        ctx.update();

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        ctx.subscribe(move |e| seen.lock().push(e.clone()));

        let ids = ctx.remove_node(scope, "root").unwrap();
        assert_eq!(ids, vec!["x", "z", "y", "root"]);
        assert_eq!(ctx.scope(scope).unwrap().node_count(), 1);
        assert_eq!(ctx.scope(scope).unwrap().connection_count(), 0);

        let sink = ctx.find_node(scope, "sink").unwrap();
        assert!(ctx.node(sink).unwrap().dependencies().is_empty());

        let removed: Vec<_> = events
            .lock()
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::NodeRemoved { .. }))
            .cloned()
            .collect();
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn disposing_an_instance_disposes_its_scope() {
        let button = ComponentDocument::new("Button").with_node(NodeDocument::new("label", "Text"));
        let app = ComponentDocument::new("App").with_node(NodeDocument::new("b", "Button"));
        let mut ctx = context(vec![button, app]);
        let scope = ctx.create_root_scope("App").unwrap();
        assert_eq!(ctx.scopes().count(), 2);

        let disposed = Arc::new(Mutex::new(Vec::new()));
        let seen = disposed.clone();
        ctx.subscribe(move |e| {
            if let RuntimeEvent::ScopeDisposed { component, .. } = e {
                seen.lock().push(component.clone());
            }
        });

        ctx.remove_node(scope, "b").unwrap();
        assert_eq!(ctx.scopes().count(), 1);
        assert_eq!(*disposed.lock(), vec!["Button".to_string()]);
        assert!(ctx.scope(scope).unwrap().children().is_empty());
    }
}
