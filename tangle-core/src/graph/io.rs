//! Node I/O Handle
//!
//! [`NodeIo`] is what node behaviors see while they run: the node's
//! internals, its resolved inputs, and a way to request output propagation.
//! Requests are recorded as effects and carried out by the runtime once the
//! behavior returns.

use super::node::{Internals, Node, NodeKey};
use crate::runtime::Propagation;
use crate::value::Value;

/// Work requested by a node behavior.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    /// Read the output through its getter and push it to the consumers.
    FlagOutputDirty(String),

    /// Pulse the output: rising edge now, falling edge after the update.
    SendSignal(String),

    /// Publish on a scoped event channel, starting at the node's scope.
    SendEvent {
        channel: String,
        payload: Value,
        propagation: Propagation,
    },
}

/// Mutable view of a node handed to setters, methods and lifecycle hooks.
pub struct NodeIo<'a> {
    node: &'a mut Node,
    port: Option<&'a str>,
    frame: u64,
    effects: Vec<Effect>,
}

impl<'a> NodeIo<'a> {
    pub(crate) fn new(node: &'a mut Node, port: Option<&'a str>, frame: u64) -> Self {
        Self {
            node,
            port,
            frame,
            effects: Vec::new(),
        }
    }

    pub fn key(&self) -> NodeKey {
        self.node.key
    }

    pub fn record_id(&self) -> &str {
        &self.node.record_id
    }

    pub fn type_name(&self) -> &str {
        &self.node.type_name
    }

    /// Input being set, when called from a setter.
    pub fn port(&self) -> Option<&str> {
        self.port
    }

    /// Frame counter at the time of the call.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn internals(&self) -> &Internals {
        &self.node.internals
    }

    pub fn internals_mut(&mut self) -> &mut Internals {
        &mut self.node.internals
    }

    /// Value last applied to another input of the same node.
    pub fn input(&self, name: &str) -> Value {
        self.node.input_value(name).cloned().unwrap_or_default()
    }

    /// Schedule propagation of output `name`.
    pub fn flag_output_dirty(&mut self, name: &str) {
        let effect = Effect::FlagOutputDirty(name.to_string());
        if !self.effects.contains(&effect) {
            self.effects.push(effect);
        }
    }

    /// Send a pulse on signal output `name`.
    pub fn send_signal(&mut self, name: &str) {
        self.effects.push(Effect::SendSignal(name.to_string()));
    }

    /// Publish `payload` on `channel` once the behavior returns.
    pub fn send_event(&mut self, channel: &str, payload: Value, propagation: Propagation) {
        self.effects.push(Effect::SendEvent {
            channel: channel.to_string(),
            payload,
            propagation,
        });
    }

    /// Store the boolean level of the input being set and return the
    /// previous one.
    pub(crate) fn swap_level(&mut self, level: bool) -> bool {
        let Some(port) = self.port else {
            return false;
        };
        match self.node.inputs.get_mut(port) {
            Some(input) => std::mem::replace(&mut input.level, level),
            None => false,
        }
    }

    /// Queue a value on one of this node's own inputs.
    pub fn queue_input(&mut self, name: &str, value: Value) -> bool {
        self.node.queue_input(name, value)
    }

    pub(crate) fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, NodeKind, ScopeId};
    use crate::model::PortType;
    use crate::registry::InputDef;

    #[test]
    fn output_flags_are_deduplicated_but_signals_are_not() {
        let key = NodeKey::new(ScopeId::from(1), NodeId::from(1));
        let mut node = Node::new(key, "n", "Test", NodeKind::ComponentChildren);
        let mut io = NodeIo::new(&mut node, Some("a"), 3);
        io.flag_output_dirty("out");
        io.flag_output_dirty("out");
        io.send_signal("done");
        io.send_signal("done");
        assert_eq!(io.port(), Some("a"));
        assert_eq!(io.frame(), 3);
        assert_eq!(io.into_effects().len(), 3);
    }

    #[test]
    fn internals_and_self_queue() {
        let key = NodeKey::new(ScopeId::from(1), NodeId::from(1));
        let mut node = Node::new(key, "n", "Test", NodeKind::ComponentChildren);
        node.register_input("next", InputDef::new(PortType::Number));
        {
            let mut io = NodeIo::new(&mut node, None, 0);
            io.internals_mut().set("count", Value::number(2.0));
            assert!(io.queue_input("next", Value::number(1.0)));
            assert!(!io.queue_input("missing", Value::number(1.0)));
        }
        assert_eq!(node.internals().number("count"), 2.0);
        assert!(node.has_queued_input());
    }
}
