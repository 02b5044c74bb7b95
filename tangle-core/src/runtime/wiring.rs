//! Connecting and disconnecting live ports.

use tracing::{debug, warn};

use super::scope::Wire;
use super::ExecutionContext;
use crate::error::{GraphError, RuntimeError};
use crate::graph::{Consumer, Node, NodeKey, NodeKind, ScopeId};
use crate::model::{ConnectionRecord, PortType};
use crate::registry::{InputDef, OutputDef};
use crate::value::Value;

impl ExecutionContext {
    /// Declaration for input `port` of `node` if it can be registered on
    /// demand.
    fn dynamic_input(&self, node: &Node, port: &str) -> Option<InputDef> {
        match &node.kind {
            NodeKind::Defined(def) => def.resolve_input(port).cloned(),
            NodeKind::ComponentOutputs => Some(InputDef::new(PortType::Any)),
            NodeKind::ComponentInstance(instance) => self
                .graph
                .component(&instance.component)?
                .port(port)
                .filter(|p| p.plug.is_input())
                .map(|p| {
                    let def = InputDef::new(p.port_type.clone());
                    match &p.default {
                        Some(default) => def.default_value(default.clone()),
                        None => def,
                    }
                }),
            NodeKind::ComponentInputs | NodeKind::ComponentChildren => None,
        }
    }

    fn dynamic_output(&self, node: &Node, port: &str) -> Option<OutputDef> {
        match &node.kind {
            NodeKind::Defined(def) => def.output_def(port).cloned(),
            NodeKind::ComponentInputs => Some(OutputDef::new(PortType::Any)),
            NodeKind::ComponentInstance(instance) => self
                .graph
                .component(&instance.component)?
                .port(port)
                .filter(|p| p.plug.is_output())
                .map(|p| OutputDef::new(p.port_type.clone())),
            NodeKind::ComponentOutputs | NodeKind::ComponentChildren => None,
        }
    }

    /// Make sure input `port` exists on `key`, registering it if the node
    /// kind allows.
    pub(crate) fn ensure_input(&mut self, key: NodeKey, port: &str) -> Result<(), RuntimeError> {
        let node = self
            .node(key)
            .ok_or_else(|| RuntimeError::NodeNotFound(key.to_string()))?;
        if node.inputs.contains_key(port) {
            return Ok(());
        }
        let def = self
            .dynamic_input(node, port)
            .ok_or_else(|| RuntimeError::UnknownInput {
                node: node.record_id.clone(),
                port: port.to_string(),
            })?;
        if let Some(node) = self.node_mut(key) {
            node.register_input(port, def);
        }
        Ok(())
    }

    pub(crate) fn ensure_output(&mut self, key: NodeKey, port: &str) -> Result<(), RuntimeError> {
        let node = self
            .node(key)
            .ok_or_else(|| RuntimeError::NodeNotFound(key.to_string()))?;
        if node.outputs.contains_key(port) {
            return Ok(());
        }
        let def = self
            .dynamic_output(node, port)
            .ok_or_else(|| RuntimeError::UnknownOutput {
                node: node.record_id.clone(),
                port: port.to_string(),
            })?;
        if let Some(node) = self.node_mut(key) {
            node.register_output(port, def);
        }
        Ok(())
    }

    /// Connect `source.output` to `target.input`.
    ///
    /// The target receives the source's current value, or the rising edge
    /// if the output is in the middle of a signal, and is marked dirty.
    pub fn connect(
        &mut self,
        source: NodeKey,
        output: &str,
        target: NodeKey,
        input: &str,
    ) -> Result<(), RuntimeError> {
        self.ensure_output(source, output)?;
        self.ensure_input(target, input)?;

        let (value, in_flight) = {
            let node = self
                .node_mut(source)
                .ok_or_else(|| RuntimeError::NodeNotFound(source.to_string()))?;
            let Some(edge) = node.outputs.get_mut(output) else {
                return Err(RuntimeError::UnknownOutput {
                    node: node.record_id.clone(),
                    port: output.to_string(),
                });
            };
            edge.add_consumer(Consumer::new(target, input));
            let in_flight = edge.signal_in_flight;
            (node.output_value(output), in_flight)
        };

        if let Some(node) = self.node_mut(target) {
            node.dependencies.push(source);
            if let Some(port) = node.inputs.get_mut(input) {
                port.connections += 1;
            }
        }

        if in_flight {
            self.deliver_input(target, input, Value::Signal(true));
        } else if !value.is_null() && !matches!(value, Value::Signal(_)) {
            self.deliver_input(target, input, value);
        } else {
            self.mark_dirty(target);
        }
        Ok(())
    }

    /// Remove one `source.output` to `target.input` connection.
    ///
    /// When the input has no connections left it falls back to the node's
    /// parameter value, or its default.
    pub fn disconnect(&mut self, source: NodeKey, output: &str, target: NodeKey, input: &str) {
        if let Some(edge) = self.node_mut(source).and_then(|n| n.outputs.get_mut(output)) {
            edge.remove_consumer(target, input);
        }

        let remaining = match self.node_mut(target) {
            Some(node) => {
                if let Some(index) = node.dependencies.iter().position(|d| *d == source) {
                    node.dependencies.remove(index);
                }
                match node.inputs.get_mut(input) {
                    Some(port) => {
                        port.connections = port.connections.saturating_sub(1);
                        port.connections
                    }
                    None => return,
                }
            }
            None => return,
        };

        if remaining == 0 {
            self.restore_input(target, input);
        }
    }

    /// Wire a connection record inside `scope`.
    pub(crate) fn wire(&mut self, scope: ScopeId, connection: &ConnectionRecord) -> Result<(), RuntimeError> {
        let endpoints = self
            .scopes
            .get(&scope)
            .ok_or(RuntimeError::ScopeNotFound(scope.raw()))?;
        let source = endpoints
            .node_key(&connection.from_id)
            .ok_or_else(|| RuntimeError::MissingEndpoint(connection.to_string()))?;
        let target = endpoints
            .node_key(&connection.to_id)
            .ok_or_else(|| RuntimeError::MissingEndpoint(connection.to_string()))?;

        self.connect(source, &connection.from_port, target, &connection.to_port)?;
        if let Some(scope) = self.scopes.get_mut(&scope) {
            scope.wires.push(Wire {
                record: connection.clone(),
                source,
                target,
            });
        }
        Ok(())
    }

    /// Undo [`ExecutionContext::wire`] for a connection record.
    pub(crate) fn unwire(&mut self, scope: ScopeId, connection: &ConnectionRecord) -> Result<(), RuntimeError> {
        let wire = {
            let scope = self
                .scopes
                .get_mut(&scope)
                .ok_or(RuntimeError::ScopeNotFound(scope.raw()))?;
            let index = scope
                .wires
                .iter()
                .position(|w| w.record == *connection)
                .ok_or_else(|| GraphError::ConnectionNotFound(connection.to_string()))?;
            scope.wires.remove(index)
        };
        self.disconnect(wire.source, &connection.from_port, wire.target, &connection.to_port);
        Ok(())
    }

    /// Tear down every wire of `scope` touching one of `nodes`.
    pub(crate) fn unwire_nodes(&mut self, scope: ScopeId, nodes: &[NodeKey]) {
        let touching: Vec<Wire> = match self.scopes.get_mut(&scope) {
            Some(scope) => {
                let (touching, kept) = std::mem::take(&mut scope.wires)
                    .into_iter()
                    .partition(|w| nodes.contains(&w.source) || nodes.contains(&w.target));
                scope.wires = kept;
                touching
            }
            None => return,
        };
        for wire in touching {
            debug!(connection = %wire.record, "tearing down connection");
            if nodes.contains(&wire.target) {
                // The target is going away; skip restoring its default.
                if let Some(edge) = self
                    .node_mut(wire.source)
                    .and_then(|n| n.outputs.get_mut(&wire.record.from_port))
                {
                    edge.remove_consumer(wire.target, &wire.record.to_port);
                }
            } else {
                self.disconnect(
                    wire.source,
                    &wire.record.from_port,
                    wire.target,
                    &wire.record.to_port,
                );
            }
        }
    }

    /// Wire every connection of `records` in `scope`, logging failures.
    pub(crate) fn wire_all<'a>(&mut self, scope: ScopeId, records: impl IntoIterator<Item = &'a ConnectionRecord>) {
        for connection in records {
            if let Err(err) = self.wire(scope, connection) {
                warn!(connection = %connection, error = %err, "skipping connection");
            }
        }
    }
}
