//! Mirroring committed graph events onto live scopes.
//!
//! Every event names the component it changed; the change is replayed on
//! each live scope instantiating that component. The model is already in
//! its final state when events are mirrored, so records are read from it
//! rather than from the events.

use tracing::{debug, warn};

use super::ExecutionContext;
use crate::config::RuntimeConfig;
use crate::graph::{NodeKey, NodeKind, ScopeId};
use crate::model::{GraphEvent, PortType};
use crate::registry::{InputDef, OutputDef};

impl ExecutionContext {
    /// Live scopes instantiating `component`.
    pub(crate) fn scopes_of(&self, component: &str) -> Vec<ScopeId> {
        self.scopes
            .values()
            .filter(|s| s.component == component)
            .map(|s| s.id)
            .collect()
    }

    /// Live instance nodes of `component`, in any scope.
    fn instances_of(&self, component: &str) -> Vec<NodeKey> {
        self.scopes
            .values()
            .flat_map(|s| s.nodes.values().flatten())
            .filter(|n| n.kind.instance().is_some_and(|i| i.component == component))
            .map(|n| n.key)
            .collect()
    }

    fn nodes_in(&self, component: &str, record_id: &str) -> Vec<NodeKey> {
        self.scopes_of(component)
            .into_iter()
            .filter_map(|scope| self.find_node(scope, record_id))
            .collect()
    }

    /// Requeue every unconnected input from parameters and defaults.
    pub(crate) fn reset_inputs(&mut self, key: NodeKey) {
        let inputs: Vec<String> = match self.node(key) {
            Some(node) => node
                .inputs
                .iter()
                .filter(|(_, port)| port.connection_count() == 0)
                .map(|(name, _)| name.clone())
                .collect(),
            None => return,
        };
        let params = self.effective_parameters(key);
        for input in inputs.iter().filter(|i| !params.contains_key(*i)) {
            let value = self.resolve_default(key, input);
            self.deliver_input(key, input, value);
        }
        self.apply_parameters(key);
    }

    /// The tree of `scope` changed; its owner may need a new children host.
    fn refresh_owner_placeholder(&mut self, scope: ScopeId) {
        if let Some(owner) = self.scopes.get(&scope).and_then(|s| s.owner) {
            self.refresh_children_placeholder(owner);
        }
    }

    /// Replay one committed event.
    pub(crate) fn mirror(&mut self, event: &GraphEvent) {
        debug!(?event, "mirroring graph event");
        match event {
            GraphEvent::ComponentAdded { .. } => {}
            GraphEvent::ComponentRemoved { component } => {
                for scope in self.scopes_of(component) {
                    if let Some(owner) = self.scopes.get(&scope).and_then(|s| s.owner) {
                        if let Some(instance) = self.node_mut(owner).and_then(|n| n.kind.instance_mut()) {
                            instance.child_scope = None;
                        }
                    }
                    self.dispose_scope(scope);
                }
            }
            GraphEvent::ComponentRenamed { old, new } => {
                for scope in self.scopes.values_mut() {
                    if scope.component == *old {
                        scope.component = new.clone();
                    }
                    for node in scope.nodes.values_mut().flatten() {
                        if node.type_name == *old {
                            node.type_name = new.clone();
                        }
                        if let Some(instance) = node.kind.instance_mut() {
                            if instance.component == *old {
                                instance.component = new.clone();
                            }
                        }
                    }
                }
            }
            GraphEvent::NodeAdded { component, ids, .. } => {
                let Some(record) = self.graph.component(component).cloned() else {
                    return;
                };
                for scope in self.scopes_of(component) {
                    self.scheduler.suppress_propagation();
                    self.create_nodes(scope, &record, ids);
                    self.scheduler.resume_propagation();
                    self.refresh_owner_placeholder(scope);
                }
            }
            GraphEvent::NodeRemoved { component, node, .. } => {
                for scope in self.scopes_of(component) {
                    if self.find_node(scope, node).is_some() {
                        if let Err(err) = self.remove_node(scope, node) {
                            warn!(node = %node, error = %err, "failed to remove node");
                        }
                    }
                }
            }
            GraphEvent::ConnectionAdded { component, connection } => {
                for scope in self.scopes_of(component) {
                    self.wire_all(scope, std::iter::once(connection));
                }
            }
            GraphEvent::ConnectionRemoved { component, connection } => {
                for scope in self.scopes_of(component) {
                    if let Err(err) = self.unwire(scope, connection) {
                        debug!(connection = %connection, error = %err, "connection was not live");
                    }
                }
            }
            GraphEvent::ParameterChanged {
                component,
                node,
                parameter,
                state,
                ..
            } => {
                for key in self.nodes_in(component, node) {
                    let visible = match state {
                        Some(state) => self.node(key).and_then(|n| n.visual_state()) == Some(state.as_str()),
                        None => true,
                    };
                    let connected = self
                        .node(key)
                        .and_then(|n| n.input(parameter))
                        .is_some_and(|p| p.connection_count() > 0);
                    if visible && !connected {
                        self.restore_input(key, parameter);
                    }
                }
            }
            GraphEvent::NodeVariantChanged { component, node, .. } => {
                for key in self.nodes_in(component, node) {
                    self.reset_inputs(key);
                }
            }
            GraphEvent::NodeReparented {
                component,
                node,
                new_parent,
                index,
                ..
            } => {
                for scope in self.scopes_of(component) {
                    let Some(key) = self.find_node(scope, node) else {
                        continue;
                    };
                    self.unlink(key);
                    let parent = new_parent.as_deref().and_then(|p| self.find_node(scope, p));
                    if new_parent.is_some() && parent.is_none() {
                        warn!(node = %node, "new parent is not live, keeping node as a root");
                    }
                    self.link(key, parent.map(|p| (p, Some(*index))));
                    self.refresh_owner_placeholder(scope);
                }
            }
            GraphEvent::PortAdded { component, port } => self.port_added(component, port),
            GraphEvent::PortRemoved { component, port } => self.port_removed(component, port),
            GraphEvent::PortRenamed { component, old, new } => self.port_renamed(component, old, new),
            GraphEvent::VariantAdded { type_name, name } => self.variant_updated(type_name, name),
            GraphEvent::VariantParameterChanged {
                type_name,
                name,
                parameter,
                value,
                state,
            } => match value {
                Some(_) => self.variant_updated(type_name, name),
                None => self.variant_parameter_deleted(type_name, name, parameter, state.as_deref()),
            },
            GraphEvent::VariantRemoved { type_name, name } => {
                // Bindings stay; they now resolve to nothing.
                let bound: Vec<NodeKey> = self
                    .scopes
                    .values()
                    .flat_map(|s| s.nodes.values().flatten())
                    .filter(|n| n.type_name == *type_name)
                    .map(|n| n.key)
                    .filter(|k| self.bound_variant(*k).as_deref() == Some(name.as_str()))
                    .collect();
                for key in bound {
                    self.reset_inputs(key);
                }
            }
            GraphEvent::SettingChanged { key } => {
                if key == "runtime" {
                    self.config = RuntimeConfig::from_settings(self.graph.settings());
                    debug!(config = ?self.config, "reloaded runtime configuration");
                }
            }
            GraphEvent::MetadataChanged { .. } | GraphEvent::RootComponentChanged { .. } => {}
        }
    }

    fn port_added(&mut self, component: &str, port: &str) {
        let Some(def) = self.graph.component(component).and_then(|c| c.port(port)).cloned() else {
            return;
        };
        for key in self.instances_of(component) {
            if let Some(node) = self.node_mut(key) {
                if def.plug.is_input() {
                    let mut input = InputDef::new(def.port_type.clone());
                    input.default = def.default.clone();
                    input.unit = def.unit.clone();
                    node.register_input(port, input);
                }
                if def.plug.is_output() {
                    node.register_output(port, OutputDef::new(def.port_type.clone()));
                }
            }
            if def.plug.is_input() && def.default.is_some() {
                self.restore_input(key, port);
            }
        }
        for scope in self.scopes_of(component) {
            let placeholders = self.placeholders(scope, |k| {
                matches!(k, NodeKind::ComponentInputs | NodeKind::ComponentOutputs)
            });
            for key in placeholders {
                let Some(node) = self.node_mut(key) else {
                    continue;
                };
                match node.kind {
                    NodeKind::ComponentInputs if def.plug.is_input() => {
                        node.register_output(port, OutputDef::new(def.port_type.clone()));
                    }
                    NodeKind::ComponentOutputs if def.plug.is_output() => {
                        node.register_input(port, InputDef::new(def.port_type.clone()));
                    }
                    _ => {}
                }
            }
        }
    }

    fn port_removed(&mut self, component: &str, port: &str) {
        for key in self.instances_of(component) {
            if let Some(node) = self.node_mut(key) {
                node.unregister_input(port);
                node.unregister_output(port);
                if let Some(instance) = node.kind.instance_mut() {
                    instance.input_values.shift_remove(port);
                    instance.output_values.shift_remove(port);
                }
            }
        }
        for scope in self.scopes_of(component) {
            let placeholders = self.placeholders(scope, |k| {
                matches!(k, NodeKind::ComponentInputs | NodeKind::ComponentOutputs)
            });
            for key in placeholders {
                if let Some(node) = self.node_mut(key) {
                    node.unregister_input(port);
                    node.unregister_output(port);
                    node.internals.remove(port);
                }
            }
        }
    }

    /// Move port state from `old` to `new`. Connections were already rewired
    /// by the events preceding the rename.
    fn port_renamed(&mut self, component: &str, old: &str, new: &str) {
        let port_type = self
            .graph
            .component(component)
            .and_then(|c| c.port(new))
            .map(|p| p.port_type.clone())
            .unwrap_or(PortType::Any);

        let mut forwards = Vec::new();
        for key in self.instances_of(component) {
            let Some(node) = self.node_mut(key) else {
                continue;
            };
            if let Some(input) = node.unregister_input(old) {
                node.register_input(new, input.def);
            }
            if let Some(output) = node.unregister_output(old) {
                node.register_output(new, output.def);
            }
            if let Some(instance) = node.kind.instance_mut() {
                if let Some(value) = instance.input_values.shift_remove(old) {
                    instance.input_values.entry(new.to_string()).or_insert(value.clone());
                    if let Some(child) = instance.child_scope {
                        forwards.push((child, value));
                    }
                }
                if let Some(value) = instance.output_values.shift_remove(old) {
                    instance.output_values.entry(new.to_string()).or_insert(value);
                }
            }
        }

        for scope in self.scopes_of(component) {
            let placeholders = self.placeholders(scope, |k| {
                matches!(k, NodeKind::ComponentInputs | NodeKind::ComponentOutputs)
            });
            for key in placeholders {
                let Some(node) = self.node_mut(key) else {
                    continue;
                };
                match node.kind {
                    NodeKind::ComponentInputs => {
                        node.unregister_output(old);
                        node.register_output(new, OutputDef::new(port_type.clone()));
                        if let Some(value) = node.internals.remove(old) {
                            node.internals.set(new, value);
                        }
                    }
                    NodeKind::ComponentOutputs => {
                        node.unregister_input(old);
                        node.register_input(new, InputDef::new(port_type.clone()));
                    }
                    _ => {}
                }
            }
        }

        for (child, value) in forwards {
            self.forward_to_child_inputs(child, new, &value);
        }
    }
}
