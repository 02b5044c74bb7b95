//! Scoped events
//!
//! Receivers listen on a named channel inside one scope. An event sent from
//! a scope walks the scope tree in one direction and stops at the first
//! receiver that consumes it.
//!
//! # Walks
//!
//! - [`Propagation::Parent`]: the sending scope, then each ancestor.
//! - [`Propagation::Children`]: the sending scope, then its descendants
//!   depth-first.
//! - [`Propagation::Siblings`]: the other children of the sender's parent
//!   scope; for a top-level scope, the other top-level scopes.

use tracing::trace;

use super::ExecutionContext;
use crate::error::RuntimeError;
use crate::graph::{NodeKey, ScopeId};
use crate::value::Value;

/// Direction in which a scoped event travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Parent,
    Children,
    Siblings,
}

/// Callback receiver; returns `true` when it consumed the event.
pub type EventHandler = Box<dyn FnMut(&Value) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(u64);

pub(crate) enum ReceiverKind {
    Callback(EventHandler),
    /// Queue the payload on a node input. Always consumes.
    Input { node: NodeKey, port: String },
}

pub(crate) struct Receiver {
    id: ReceiverId,
    channel: String,
    kind: ReceiverKind,
}

impl ExecutionContext {
    fn add_receiver(&mut self, scope: ScopeId, channel: &str, kind: ReceiverKind) -> Result<ReceiverId, RuntimeError> {
        let id = ReceiverId(self.ids.next_raw());
        self.scopes
            .get_mut(&scope)
            .ok_or(RuntimeError::ScopeNotFound(scope.raw()))?
            .receivers
            .push(Receiver {
                id,
                channel: channel.to_string(),
                kind,
            });
        Ok(id)
    }

    /// Listen on `channel` in `scope`.
    pub fn add_event_receiver<F>(&mut self, scope: ScopeId, channel: &str, handler: F) -> Result<ReceiverId, RuntimeError>
    where
        F: FnMut(&Value) -> bool + Send + 'static,
    {
        self.add_receiver(scope, channel, ReceiverKind::Callback(Box::new(handler)))
    }

    /// Route events on `channel` in the node's scope to one of its inputs.
    pub fn add_event_input(&mut self, node: NodeKey, channel: &str, port: &str) -> Result<ReceiverId, RuntimeError> {
        if self.node(node).is_none() {
            return Err(RuntimeError::NodeNotFound(node.to_string()));
        }
        self.ensure_input(node, port)?;
        self.add_receiver(
            node.scope,
            channel,
            ReceiverKind::Input {
                node,
                port: port.to_string(),
            },
        )
    }

    pub fn remove_event_receiver(&mut self, id: ReceiverId) -> bool {
        for scope in self.scopes.values_mut() {
            if let Some(index) = scope.receivers.iter().position(|r| r.id == id) {
                scope.receivers.remove(index);
                return true;
            }
        }
        false
    }

    fn event_walk(&self, from: ScopeId, propagation: Propagation) -> Vec<ScopeId> {
        match propagation {
            Propagation::Parent => {
                let mut walk = Vec::new();
                let mut current = Some(from);
                while let Some(id) = current {
                    walk.push(id);
                    current = self.scopes.get(&id).and_then(|s| s.parent);
                }
                walk
            }
            Propagation::Children => {
                let mut walk = Vec::new();
                let mut stack = vec![from];
                while let Some(id) = stack.pop() {
                    walk.push(id);
                    if let Some(scope) = self.scopes.get(&id) {
                        stack.extend(scope.children.iter().rev().copied());
                    }
                }
                walk
            }
            Propagation::Siblings => {
                let parent = self.scopes.get(&from).and_then(|s| s.parent);
                let siblings: Vec<ScopeId> = match parent.and_then(|p| self.scopes.get(&p)) {
                    Some(parent) => parent.children.clone(),
                    None => self
                        .scopes
                        .values()
                        .filter(|s| s.parent.is_none())
                        .map(|s| s.id)
                        .collect(),
                };
                siblings.into_iter().filter(|s| *s != from).collect()
            }
        }
    }

    /// Offer the event to the receivers of one scope.
    fn deliver_event(&mut self, scope: ScopeId, channel: &str, payload: &Value) -> bool {
        let mut routed = None;
        let consumed = {
            let Some(scope) = self.scopes.get_mut(&scope) else {
                return false;
            };
            let mut consumed = false;
            for receiver in scope.receivers.iter_mut().filter(|r| r.channel == channel) {
                match &mut receiver.kind {
                    ReceiverKind::Callback(handler) => {
                        if handler(payload) {
                            consumed = true;
                            break;
                        }
                    }
                    ReceiverKind::Input { node, port } => {
                        routed = Some((*node, port.clone()));
                        consumed = true;
                        break;
                    }
                }
            }
            consumed
        };
        if let Some((node, port)) = routed {
            self.deliver_input(node, &port, payload.clone());
        }
        consumed
    }

    /// Send `payload` on `channel` starting from scope `from`.
    ///
    /// Returns whether a receiver consumed it.
    pub fn send_event(&mut self, from: ScopeId, channel: &str, payload: &Value, propagation: Propagation) -> bool {
        for scope in self.event_walk(from, propagation) {
            if self.deliver_event(scope, channel, payload) {
                trace!(channel, scope = scope.raw(), "event consumed");
                return true;
            }
        }
        trace!(channel, from = from.raw(), "event not consumed");
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::super::test_support::registry;
    use super::*;
    use crate::model::{ComponentDocument, GraphDocument, GraphModel, NodeDocument};

    /// App > Panel > Leaf, with a second Leaf beside the Panel.
    fn context() -> (ExecutionContext, ScopeId, ScopeId, ScopeId, ScopeId) {
        let leaf = ComponentDocument::new("Leaf").with_node(NodeDocument::new("n", "Number"));
        let panel = ComponentDocument::new("Panel").with_node(NodeDocument::new("leaf", "Leaf"));
        let app = ComponentDocument::new("App")
            .with_node(NodeDocument::new("panel", "Panel"))
            .with_node(NodeDocument::new("other", "Leaf"));
        let graph = GraphModel::import(GraphDocument {
            components: vec![leaf, panel, app],
            ..GraphDocument::default()
        })
        .unwrap();
        let mut ctx = ExecutionContext::with_registry(graph, registry());
        let app = ctx.create_root_scope("App").unwrap();
        let child = |ctx: &ExecutionContext, scope, id| {
            let key = ctx.find_node(scope, id).unwrap();
            ctx.node(key).unwrap().kind().instance().unwrap().child_scope().unwrap()
        };
        let panel = child(&ctx, app, "panel");
        let leaf = child(&ctx, panel, "leaf");
        let other = child(&ctx, app, "other");
        (ctx, app, panel, leaf, other)
    }

    fn recorder(ctx: &mut ExecutionContext, scope: ScopeId, name: &'static str, consume: bool, log: &Arc<Mutex<Vec<&'static str>>>) {
        let log = log.clone();
        ctx.add_event_receiver(scope, "ping", move |_| {
            log.lock().push(name);
            consume
        })
        .unwrap();
    }

    #[test]
    fn parent_walk_stops_at_first_consumer() {
        let (mut ctx, app, panel, leaf, _) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctx, leaf, "leaf", false, &log);
        recorder(&mut ctx, panel, "panel", true, &log);
        recorder(&mut ctx, app, "app", true, &log);

        assert!(ctx.send_event(leaf, "ping", &Value::null(), Propagation::Parent));
        assert_eq!(*log.lock(), vec!["leaf", "panel"]);
    }

    #[test]
    fn children_walk_is_depth_first() {
        let (mut ctx, app, panel, leaf, other) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctx, other, "other", false, &log);
        recorder(&mut ctx, leaf, "leaf", false, &log);
        recorder(&mut ctx, panel, "panel", false, &log);

        assert!(!ctx.send_event(app, "ping", &Value::null(), Propagation::Children));
        assert_eq!(*log.lock(), vec!["panel", "leaf", "other"]);
    }

    #[test]
    fn siblings_exclude_the_sender() {
        let (mut ctx, _, panel, _, other) = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctx, panel, "panel", true, &log);
        recorder(&mut ctx, other, "other", true, &log);

        assert!(ctx.send_event(panel, "ping", &Value::null(), Propagation::Siblings));
        assert_eq!(*log.lock(), vec!["other"]);
    }

    #[test]
    fn input_receivers_queue_the_payload() {
        let (mut ctx, _, _, leaf, _) = context();
        let n = ctx.find_node(leaf, "n").unwrap();
        let id = ctx.add_event_input(n, "set", "value").unwrap();

        assert!(ctx.send_event(leaf, "set", &Value::number(9.0), Propagation::Parent));
        ctx.update();
        assert_eq!(ctx.output_value(n, "result"), Some(Value::number(9.0)));

        assert!(ctx.remove_event_receiver(id));
        assert!(!ctx.send_event(leaf, "set", &Value::number(1.0), Propagation::Parent));
    }
}
