//! Component instances and the visual tree.
//!
//! An instance node forwards its input values to the `Component Inputs`
//! placeholders of its scope and exposes the values arriving at the
//! `Component Outputs` placeholders as its own outputs. Visual children
//! given to an instance are hosted by the scope's `Component Children`
//! placeholder.

use tracing::{trace, warn};

use super::{Deferred, ExecutionContext};
use crate::graph::{NodeKey, NodeKind, ScopeId};
use crate::model::PortType;
use crate::registry::OutputDef;
use crate::value::Value;

impl ExecutionContext {
    /// Push an instance input value into its scope.
    pub(crate) fn forward_to_child_inputs(&mut self, child: ScopeId, port: &str, value: &Value) {
        let targets = self.placeholders(child, |k| matches!(k, NodeKind::ComponentInputs));
        for key in targets {
            let Some(mut node) = self.checkout(key) else {
                continue;
            };
            node.register_output(port, OutputDef::new(PortType::Any));
            node.internals.set(port, value.clone());
            self.propagate_output(&mut node, port);
            self.checkin(node);
        }
    }

    /// A value reached the outputs placeholder of `scope`; hand it to the
    /// instance that owns the scope.
    pub(crate) fn forward_to_owner(&mut self, scope: ScopeId, port: &str, value: Value) {
        let Some(owner) = self.scopes.get(&scope).and_then(|s| s.owner) else {
            trace!(scope = scope.raw(), port, "outputs placeholder without owner");
            return;
        };
        self.set_instance_output(owner, port, value);
    }

    pub(crate) fn set_instance_output(&mut self, owner: NodeKey, port: &str, value: Value) {
        if self.is_checked_out(owner) {
            self.deferred.entry(owner).or_default().push(Deferred::OwnerOutput {
                port: port.to_string(),
                value,
            });
            return;
        }
        if let Err(err) = self.ensure_output(owner, port) {
            warn!(node = %owner, error = %err, "dropping component output");
            return;
        }
        let Some(mut node) = self.checkout(owner) else {
            return;
        };
        if let Some(instance) = node.kind.instance_mut() {
            instance.output_values.insert(port.to_string(), value);
        }
        self.propagate_output(&mut node, port);
        self.checkin(node);
    }

    /// Add `child` under `parent` in the visual tree.
    ///
    /// Children of an instance are recorded on the instance and attached to
    /// its children placeholder, or to the instance itself if its component
    /// has none.
    pub(crate) fn add_visual_child(&mut self, parent: NodeKey, child: NodeKey, index: Option<usize>) {
        let redirect = match self.node_mut(parent).and_then(|n| n.kind.instance_mut()) {
            Some(instance) => {
                let at = index
                    .unwrap_or(instance.children.len())
                    .min(instance.children.len());
                instance.children.insert(at, child);
                Some((instance.children_placeholder.unwrap_or(parent), at))
            }
            None => None,
        };
        match redirect {
            Some((host, at)) => self.attach_visual(host, child, Some(at)),
            None => self.attach_visual(parent, child, index),
        }
    }

    pub(crate) fn attach_visual(&mut self, parent: NodeKey, child: NodeKey, index: Option<usize>) {
        if let Some(node) = self.node_mut(parent) {
            let at = index
                .unwrap_or(node.visual_children.len())
                .min(node.visual_children.len());
            node.visual_children.insert(at, child);
        }
        if let Some(node) = self.node_mut(child) {
            node.visual_parent = Some(parent);
        }
        self.invalidate_render_cache(parent);
    }

    pub(crate) fn detach_visual(&mut self, child: NodeKey) {
        let Some(parent) = self.node_mut(child).and_then(|n| n.visual_parent.take()) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.visual_children.retain(|c| *c != child);
        }
        self.invalidate_render_cache(parent);
    }

    /// Re-host an instance's visual children after the children placeholder
    /// of its scope appeared, moved or went away.
    pub(crate) fn refresh_children_placeholder(&mut self, owner: NodeKey) {
        let Some(child_scope) = self
            .node(owner)
            .and_then(|n| n.kind.instance())
            .and_then(|i| i.child_scope)
        else {
            return;
        };
        let placeholder = self.scopes.get(&child_scope).and_then(|scope| {
            scope
                .tree_order()
                .into_iter()
                .map(|n| NodeKey::new(child_scope, n))
                .find(|k| matches!(self.node(*k).map(|n| &n.kind), Some(NodeKind::ComponentChildren)))
        });

        let children = match self.node_mut(owner).and_then(|n| n.kind.instance_mut()) {
            Some(instance) if instance.children_placeholder != placeholder => {
                instance.children_placeholder = placeholder;
                instance.children.clone()
            }
            _ => return,
        };

        let host = placeholder.unwrap_or(owner);
        for child in children {
            self.detach_visual(child);
            self.attach_visual(host, child, None);
        }
    }

    /// The roots of `scope` changed; the instance rendering it is stale.
    pub(crate) fn roots_changed(&mut self, scope: ScopeId) {
        if let Some(owner) = self.scopes.get(&scope).and_then(|s| s.owner) {
            self.invalidate_render_cache(owner);
        }
    }

    /// Invalidate the render cache of `key` and every visual ancestor,
    /// crossing into the scope owner at each scope's roots.
    pub(crate) fn invalidate_render_cache(&mut self, key: NodeKey) {
        let mut current = Some(key);
        while let Some(key) = current {
            let Some(node) = self.node_mut(key) else {
                break;
            };
            node.render_cache_valid = false;
            current = match (node.visual_parent, node.tree_parent) {
                (Some(parent), _) => Some(parent),
                (None, None) => self.scopes.get(&key.scope).and_then(|s| s.owner),
                (None, Some(_)) => None,
            };
        }
    }
}
