//! Node evaluation: dependency-first updates, input draining, output
//! propagation and the cycle breakers.

use tracing::{debug, trace, warn};

use super::{Deferred, ExecutionContext, RuntimeEvent};
use crate::error::RuntimeError;
use crate::graph::{Completion, Consumer, Effect, Evaluation, Node, NodeIo, NodeKey, NodeKind, ScopeId};
use crate::value::Value;

impl ExecutionContext {
    pub(crate) fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.scopes
            .get_mut(&key.scope)?
            .nodes
            .get_mut(&key.node)?
            .as_mut()
    }

    /// Whether `key` exists but is currently taken out of its slot.
    pub(crate) fn is_checked_out(&self, key: NodeKey) -> bool {
        matches!(
            self.scopes.get(&key.scope).and_then(|s| s.nodes.get(&key.node)),
            Some(None)
        )
    }

    pub(crate) fn checkout(&mut self, key: NodeKey) -> Option<Node> {
        self.scopes
            .get_mut(&key.scope)?
            .nodes
            .get_mut(&key.node)?
            .take()
    }

    /// Put a node back into its slot and deliver what was held back for it.
    pub(crate) fn checkin(&mut self, node: Node) {
        let key = node.key;
        match self
            .scopes
            .get_mut(&key.scope)
            .and_then(|s| s.nodes.get_mut(&key.node))
        {
            Some(slot) => *slot = Some(node),
            None => {
                debug!(node = %key, "dropping node whose slot was removed");
                self.deferred.remove(&key);
                return;
            }
        }

        if let Some(pending) = self.deferred.remove(&key) {
            for item in pending {
                match item {
                    Deferred::Input { port, value } => self.deliver_input(key, &port, value),
                    Deferred::OwnerOutput { port, value } => self.set_instance_output(key, &port, value),
                }
            }
        }
    }

    /// Mark a node dirty and schedule it if it was clean.
    pub(crate) fn mark_dirty(&mut self, key: NodeKey) {
        let schedule = match self.node_mut(key) {
            Some(node) => node.guard.mark_dirty(),
            None => false,
        };
        if schedule {
            self.scheduler.schedule_dirty(key);
        }
    }

    /// Queue `value` on input `port` of `key` and mark the node dirty.
    pub(crate) fn deliver_input(&mut self, key: NodeKey, port: &str, value: Value) {
        if self.is_checked_out(key) {
            self.deferred.entry(key).or_default().push(Deferred::Input {
                port: port.to_string(),
                value,
            });
            return;
        }
        if let Err(err) = self.ensure_input(key, port) {
            warn!(node = %key, error = %err, "dropping value for unknown input");
            return;
        }
        let schedule = match self.node_mut(key) {
            Some(node) => {
                node.queue_input(port, value);
                node.guard.mark_dirty()
            }
            None => false,
        };
        if schedule {
            self.scheduler.schedule_dirty(key);
        }
    }

    /// Nodes that must be evaluated before `key`.
    fn dependencies_of(&self, key: NodeKey) -> Vec<NodeKey> {
        let Some(node) = self.node(key) else {
            return Vec::new();
        };
        let mut deps = node.dependencies.clone();
        // An instance also waits on the outputs placeholders of its scope.
        if let Some(child) = node.kind.instance().and_then(|i| i.child_scope) {
            deps.extend(self.placeholders(child, |k| matches!(k, NodeKind::ComponentOutputs)));
        }
        deps
    }

    /// Keys of the nodes in `scope` whose kind matches.
    pub(crate) fn placeholders(&self, scope: ScopeId, matches: impl Fn(&NodeKind) -> bool) -> Vec<NodeKey> {
        let Some(scope) = self.scopes.get(&scope) else {
            return Vec::new();
        };
        scope
            .nodes
            .values()
            .flatten()
            .filter(|n| matches(&n.kind))
            .map(|n| n.key)
            .collect()
    }

    /// Evaluate `key` if it is dirty.
    ///
    /// Dirty dependencies are evaluated first. A dependency that is already
    /// evaluating is part of a cycle and is skipped.
    pub(crate) fn update_node(&mut self, key: NodeKey) -> Result<(), RuntimeError> {
        let iteration = self.scheduler.frame();
        let max_evaluations = self.config.max_node_iterations;

        loop {
            let Some(node) = self.node_mut(key) else {
                return Ok(());
            };
            match node.guard.begin(iteration, max_evaluations) {
                Evaluation::Skip => return Ok(()),
                Evaluation::CycleDetected => {
                    self.park_cyclic(key);
                    return Ok(());
                }
                Evaluation::Proceed => {}
            }

            for dep in self.dependencies_of(key) {
                if dep == key || !self.node(dep).is_some_and(|n| n.guard.is_dirty()) {
                    continue;
                }
                if let Err(err) = self.update_node(dep) {
                    if let Some(node) = self.node_mut(key) {
                        node.guard.abort();
                    }
                    self.scheduler.schedule_dirty(key);
                    return Err(err);
                }
            }

            let Some(mut node) = self.checkout(key) else {
                return Ok(());
            };
            trace!(node = %key, type_name = %node.type_name, "evaluating");
            let result = self.drain_inputs(&mut node);
            let pending = node.has_queued_input();
            let completion = node.guard.finish(pending);
            self.checkin(node);

            if let Err(err) = result {
                // Values queued behind the failure drain in a later pass.
                match completion {
                    Completion::CycleDetected => self.park_cyclic(key),
                    Completion::Again => self.scheduler.schedule_dirty(key),
                    Completion::Clean => {}
                }
                return Err(err);
            }

            match completion {
                Completion::CycleDetected => {
                    self.park_cyclic(key);
                    return Ok(());
                }
                Completion::Clean | Completion::Again => {}
            }
            if !self.node(key).is_some_and(|n| n.guard.is_dirty()) {
                return Ok(());
            }
        }
    }

    /// Apply queued inputs one round at a time until none are left.
    fn drain_inputs(&mut self, node: &mut Node) -> Result<(), RuntimeError> {
        let inputs_updated = node
            .kind
            .definition()
            .and_then(|d| d.inputs_updated_hook())
            .cloned();

        loop {
            let round = node.take_input_round();
            if round.is_empty() {
                return Ok(());
            }
            let mut dirty = Vec::new();
            let mut failure = None;
            for (port, value) in round {
                node.set_resolved(&port, value.clone());
                if let Err(err) = self.apply_input(node, &port, value, &mut dirty) {
                    failure.get_or_insert(err);
                }
            }
            // Outputs go out once the whole round is applied.
            for port in dirty {
                self.propagate_output(node, &port);
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if let Some(hook) = &inputs_updated {
                let mut io = NodeIo::new(node, None, self.scheduler.frame());
                hook(&mut io);
                let effects = io.into_effects();
                self.apply_effects(node, effects);
            }
        }
    }

    /// Hand one input value to the node's behavior.
    ///
    /// Outputs the behavior flags dirty are collected in `dirty`.
    fn apply_input(&mut self, node: &mut Node, port: &str, value: Value, dirty: &mut Vec<String>) -> Result<(), RuntimeError> {
        match node.kind {
            NodeKind::Defined(_) => {
                let setter = node.inputs.get(port).and_then(|p| p.def.setter.clone());
                match setter {
                    Some(setter) => {
                        let mut io = NodeIo::new(node, Some(port), self.scheduler.frame());
                        let result = setter(&mut io, value);
                        let mut effects = io.into_effects();
                        effects.retain(|effect| match effect {
                            Effect::FlagOutputDirty(output) => {
                                if !dirty.contains(output) {
                                    dirty.push(output.clone());
                                }
                                false
                            }
                            _ => true,
                        });
                        self.apply_effects(node, effects);
                        result.map_err(|message| RuntimeError::UpdateFailed {
                            node: format!("{} ({})", node.record_id, node.type_name),
                            message,
                        })
                    }
                    None => {
                        // Ports declared only on the record pass their value through.
                        node.internals.set(port, value);
                        if node.outputs.contains_key(port) && !dirty.iter().any(|p| p == port) {
                            dirty.push(port.to_string());
                        }
                        Ok(())
                    }
                }
            }
            NodeKind::ComponentOutputs => {
                self.forward_to_owner(node.key.scope, port, value);
                Ok(())
            }
            NodeKind::ComponentInstance(ref mut instance) => {
                instance.input_values.insert(port.to_string(), value.clone());
                let child = instance.child_scope;
                if let Some(child) = child {
                    self.forward_to_child_inputs(child, port, &value);
                }
                Ok(())
            }
            NodeKind::ComponentInputs | NodeKind::ComponentChildren => {
                node.internals.set(port, value);
                Ok(())
            }
        }
    }

    pub(crate) fn apply_effects(&mut self, node: &mut Node, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FlagOutputDirty(port) => self.propagate_output(node, &port),
                Effect::SendSignal(port) => self.send_signal(node, &port),
                Effect::SendEvent {
                    channel,
                    payload,
                    propagation,
                } => {
                    self.send_event(node.key.scope, &channel, &payload, propagation);
                }
            }
        }
    }

    /// Invoke method `name` registered on the node's type.
    pub fn call_method(&mut self, key: NodeKey, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let method = self
            .node(key)
            .ok_or_else(|| RuntimeError::NodeNotFound(key.to_string()))?
            .kind
            .definition()
            .and_then(|d| d.method_fn(name))
            .cloned()
            .ok_or_else(|| RuntimeError::MethodNotFound {
                node: key.to_string(),
                method: name.to_string(),
            })?;
        let mut node = self
            .checkout(key)
            .ok_or_else(|| RuntimeError::NodeNotFound(key.to_string()))?;
        trace!(node = %key, method = name, "calling method");

        let mut io = NodeIo::new(&mut node, None, self.scheduler.frame());
        let result = method(&mut io, args);
        let effects = io.into_effects();
        self.apply_effects(&mut node, effects);

        let failed = format!("{} ({})", node.record_id, node.type_name);
        let pending = node.has_queued_input();
        self.checkin(node);
        if pending {
            self.mark_dirty(key);
        }
        result.map_err(|message| RuntimeError::UpdateFailed { node: failed, message })
    }

    fn warn_unknown_output(&mut self, node: &Node, port: &str) {
        self.scheduler.warn_once(
            format!("output:{}:{}", node.type_name, port),
            &format!("node type '{}' has no output '{}'", node.type_name, port),
        );
    }

    /// Count a send against the node's limit, parking it when exceeded.
    fn allow_send(&mut self, node: &mut Node) -> bool {
        if node
            .guard
            .record_send(self.scheduler.frame(), self.config.max_output_sends)
        {
            return true;
        }
        self.report_cycle(node.key, &node.type_name, &node.record_id);
        false
    }

    /// Read output `port` through its getter and push it to every consumer.
    pub(crate) fn propagate_output(&mut self, node: &mut Node, port: &str) {
        let consumers = match node.outputs.get(port) {
            Some(edge) => edge.consumers().to_vec(),
            None => {
                self.warn_unknown_output(node, port);
                return;
            }
        };
        if consumers.is_empty() || !self.allow_send(node) {
            return;
        }
        let value = node.output_value(port);
        for consumer in consumers {
            self.send_value(node.key, port, consumer, value.clone());
        }
    }

    /// Send the rising edge of a pulse now and the falling edge once the
    /// current pass has drained.
    pub(crate) fn send_signal(&mut self, node: &mut Node, port: &str) {
        let (consumers, restart) = match node.outputs.get(port) {
            Some(edge) => (edge.consumers().to_vec(), edge.signal_in_flight),
            None => {
                self.warn_unknown_output(node, port);
                return;
            }
        };
        if !self.allow_send(node) {
            return;
        }
        if let Some(edge) = node.outputs.get_mut(port) {
            edge.signal_in_flight = true;
        }
        for consumer in consumers {
            // A second pulse before the falling edge needs its own edge.
            if restart {
                self.send_value(node.key, port, consumer.clone(), Value::Signal(false));
            }
            self.send_value(node.key, port, consumer, Value::Signal(true));
        }
        if !restart {
            let key = node.key;
            let port = port.to_string();
            self.scheduler
                .schedule_after_update(Box::new(move |ctx| ctx.finish_signal(key, &port)));
        }
    }

    fn finish_signal(&mut self, key: NodeKey, port: &str) {
        let Some(node) = self.node_mut(key) else {
            return;
        };
        let Some(edge) = node.outputs.get_mut(port) else {
            return;
        };
        if !edge.signal_in_flight {
            return;
        }
        edge.signal_in_flight = false;
        let consumers = edge.consumers().to_vec();
        for consumer in consumers {
            self.send_value(key, port, consumer, Value::Signal(false));
        }
    }

    fn send_value(&mut self, source: NodeKey, port: &str, consumer: Consumer, value: Value) {
        if let Some(hook) = self.scheduler.hooks.on_value_sent.as_mut() {
            hook(source, port, &value);
        }
        self.deliver_input(consumer.node, &consumer.port, value);
    }

    /// Report a cyclic node once and let it resume next frame.
    fn report_cycle(&mut self, key: NodeKey, type_name: &str, record_id: &str) {
        let first = self.scheduler.warn_once(
            format!("cycle:{key}"),
            &format!("cyclic update at node '{record_id}' ({type_name}); deferred to next frame"),
        );
        if first {
            if let Some(hook) = self.scheduler.hooks.on_cycle_detected.as_mut() {
                hook(key);
            }
            self.events.emit(&RuntimeEvent::CycleDetected {
                node: key,
                type_name: type_name.to_string(),
                record_id: record_id.to_string(),
            });
        }
        self.scheduler
            .schedule_next_frame(Box::new(move |ctx| ctx.resume_node(key)));
    }

    fn park_cyclic(&mut self, key: NodeKey) {
        let Some(node) = self.node(key) else {
            return;
        };
        let type_name = node.type_name.clone();
        let record_id = node.record_id.clone();
        self.report_cycle(key, &type_name, &record_id);
    }

    fn resume_node(&mut self, key: NodeKey) {
        let schedule = self.node_mut(key).is_some_and(|n| n.guard.resume());
        if schedule {
            debug!(node = %key, "resuming node parked by cycle guard");
            self.scheduler.schedule_dirty(key);
        }
    }
}
