//! Parameters, defaults, visual states and variants.
//!
//! A node's effective parameters are those of the variant bound to it, or,
//! when no variant is bound, those of its record. Either set is taken for
//! the node's current visual state. The bound variant is the runtime
//! override if one is set, else the variant named by the record.
//!
//! Parameters are delivered as ordinary input values; the node applies them
//! highest input priority first. Inputs with live connections are left
//! alone.

use tracing::{debug, trace};

use super::ExecutionContext;
use crate::error::RuntimeError;
use crate::graph::{Node, NodeKey};
use crate::model::ParameterMap;
use crate::value::Value;

impl ExecutionContext {
    /// Name of the variant bound to `key`.
    pub fn bound_variant(&self, key: NodeKey) -> Option<String> {
        let node = self.node(key)?;
        if let Some(name) = &node.variant_override {
            return Some(name.clone());
        }
        let scope = self.scopes.get(&key.scope)?;
        self.graph
            .component(&scope.component)?
            .node(&node.record_id)?
            .variant
            .clone()
    }

    /// Parameters currently in effect for `key`, unordered.
    pub(crate) fn effective_parameters(&self, key: NodeKey) -> ParameterMap {
        let Some(node) = self.node(key) else {
            return ParameterMap::new();
        };
        let state = node.visual_state.as_deref();
        // A bound variant replaces the record's parameters outright.
        if let Some(variant) = self
            .bound_variant(key)
            .and_then(|name| self.graph.variant(&node.type_name, &name))
        {
            return variant.parameters_for_state(state);
        }
        self.scopes
            .get(&key.scope)
            .and_then(|s| self.graph.component(&s.component))
            .and_then(|c| c.node(&node.record_id))
            .map(|r| r.parameters_for_state(state))
            .unwrap_or_default()
    }

    fn is_connected(&self, key: NodeKey, input: &str) -> bool {
        self.node(key)
            .and_then(|n| n.input(input))
            .map(|p| p.connection_count() > 0)
            .unwrap_or(false)
    }

    /// Deliver every effective parameter of `key` to its inputs.
    pub(crate) fn apply_parameters(&mut self, key: NodeKey) {
        for (name, value) in self.effective_parameters(key) {
            if self.is_connected(key, &name) {
                continue;
            }
            self.deliver_input(key, &name, Value::from_json(value));
        }
    }

    /// Default for an input: the project's per-type override from settings
    /// key `"defaults"`, else the port's registered default.
    pub fn resolve_default(&self, key: NodeKey, input: &str) -> Value {
        let Some(node) = self.node(key) else {
            return Value::null();
        };
        let configured = self
            .graph
            .settings()
            .get("defaults")
            .and_then(|d| d.get(&node.type_name))
            .and_then(|t| t.get(input))
            .cloned();
        configured
            .or_else(|| node.input(input).and_then(|p| p.def().default.clone()))
            .map(Value::from_json)
            .unwrap_or_default()
    }

    /// Requeue the value an unconnected input should hold: its effective
    /// parameter, else its default.
    pub(crate) fn restore_input(&mut self, key: NodeKey, input: &str) {
        let value = match self.effective_parameters(key).shift_remove(input) {
            Some(param) => Value::from_json(param),
            None => self.resolve_default(key, input),
        };
        trace!(node = %key, input, "restoring input");
        self.deliver_input(key, input, value);
    }

    /// Apply `change` to the node, then bring its inputs in line with the
    /// parameters now in effect.
    ///
    /// Inputs that lost their parameter fall back to their default.
    fn reapply_parameters(&mut self, key: NodeKey, change: impl FnOnce(&mut Node)) -> Result<(), RuntimeError> {
        let before = self.effective_parameters(key);
        change(
            self.node_mut(key)
                .ok_or_else(|| RuntimeError::NodeNotFound(key.to_string()))?,
        );
        let after = self.effective_parameters(key);

        for name in before.keys().filter(|name| !after.contains_key(*name)) {
            if !self.is_connected(key, name) {
                let value = self.resolve_default(key, name);
                self.deliver_input(key, name, value);
            }
        }
        self.apply_parameters(key);
        Ok(())
    }

    /// Switch the visual state of `key` and reapply its parameters.
    pub fn set_visual_state(&mut self, key: NodeKey, state: Option<&str>) -> Result<(), RuntimeError> {
        let state = state.map(str::to_string);
        self.reapply_parameters(key, |node| node.visual_state = state)
    }

    /// Bind `key` to a variant at runtime, overriding the record's variant.
    /// `None` clears the override.
    pub fn set_node_variant(&mut self, key: NodeKey, variant: Option<&str>) -> Result<(), RuntimeError> {
        let variant = variant.map(str::to_string);
        self.reapply_parameters(key, |node| node.variant_override = variant)
    }

    /// Live nodes of `type_name` bound to variant `name`.
    pub(crate) fn variant_instances(&self, type_name: &str, name: &str) -> Vec<NodeKey> {
        self.scopes
            .values()
            .flat_map(|s| s.nodes.values().flatten())
            .filter(|n| n.type_name == type_name)
            .map(|n| n.key)
            .filter(|key| self.bound_variant(*key).as_deref() == Some(name))
            .collect()
    }

    /// A variant changed; reapply the full parameter set of its instances.
    pub(crate) fn variant_updated(&mut self, type_name: &str, name: &str) {
        let instances = self.variant_instances(type_name, name);
        debug!(variant = %name, type_name, instances = instances.len(), "reapplying variant");
        for key in instances {
            self.apply_parameters(key);
        }
    }

    /// A parameter was deleted from a variant; requeue the input on every
    /// bound instance the deletion applies to.
    pub(crate) fn variant_parameter_deleted(&mut self, type_name: &str, name: &str, parameter: &str, state: Option<&str>) {
        for key in self.variant_instances(type_name, name) {
            let applies = match state {
                Some(state) => self.node(key).and_then(|n| n.visual_state.as_deref()) == Some(state),
                None => true,
            };
            if applies && !self.is_connected(key, parameter) {
                self.restore_input(key, parameter);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::registry;
    use super::*;
    use crate::model::{ComponentDocument, GraphDocument, GraphModel, NodeDocument, VariantRecord};

    fn context(doc: GraphDocument) -> (ExecutionContext, crate::graph::ScopeId) {
        let graph = GraphModel::import(doc).unwrap();
        let mut ctx = ExecutionContext::with_registry(graph, registry());
        let scope = ctx.create_root_scope("App").unwrap();
        ctx.update();
        (ctx, scope)
    }

    fn text(ctx: &ExecutionContext, key: NodeKey, name: &str) -> Value {
        ctx.node(key).unwrap().internals().value(name)
    }

    #[test]
    fn parameters_apply_in_priority_order() {
        let app = ComponentDocument::new("App").with_node(
            NodeDocument::new("t", "Text")
                .with_parameter("text", json!("hi"))
                .with_parameter("size", json!(14))
                .with_parameter("color", json!("red")),
        );
        let (ctx, scope) = context(GraphDocument {
            components: vec![app],
            ..GraphDocument::default()
        });
        let t = ctx.find_node(scope, "t").unwrap();
        assert_eq!(text(&ctx, t, "log").to_json(), json!(["color", "text", "size"]));
    }

    #[test]
    fn defaults_come_from_settings_before_the_port() {
        let mut settings = serde_json::Map::new();
        settings.insert("defaults".into(), json!({ "Text": { "color": "blue" } }));
        let app = ComponentDocument::new("App").with_node(NodeDocument::new("t", "Text"));
        let (ctx, scope) = context(GraphDocument {
            components: vec![app],
            settings,
            ..GraphDocument::default()
        });
        let t = ctx.find_node(scope, "t").unwrap();
        assert_eq!(ctx.resolve_default(t, "color"), Value::string("blue"));
        assert_eq!(ctx.resolve_default(t, "text"), Value::string(""));
    }

    #[test]
    fn visual_state_overrides_and_reverts() {
        let mut node = NodeDocument::new("t", "Text").with_parameter("text", json!("idle"));
        node.state_parameters
            .insert("hover".into(), [("text".to_string(), json!("hot")), ("color".to_string(), json!("red"))].into_iter().collect());
        let app = ComponentDocument::new("App").with_node(node);
        let (mut ctx, scope) = context(GraphDocument {
            components: vec![app],
            ..GraphDocument::default()
        });
        let t = ctx.find_node(scope, "t").unwrap();

        ctx.set_visual_state(t, Some("hover")).unwrap();
        ctx.update();
        assert_eq!(text(&ctx, t, "text"), Value::string("hot"));
        assert_eq!(text(&ctx, t, "color"), Value::string("red"));

        ctx.set_visual_state(t, None).unwrap();
        ctx.update();
        assert_eq!(text(&ctx, t, "text"), Value::string("idle"));
        assert_eq!(text(&ctx, t, "color"), Value::string("black"));
    }

    #[test]
    fn variant_parameters_replace_explicit_ones() {
        let app = ComponentDocument::new("App").with_node(
            NodeDocument::new("t", "Text")
                .with_parameter("color", json!("green"))
                .with_parameter("text", json!("hello"))
                .with_variant("Primary"),
        );
        let (ctx, scope) = context(GraphDocument {
            components: vec![app],
            variants: vec![VariantRecord::new("Text", "Primary").with_parameter("color", json!("navy"))],
            ..GraphDocument::default()
        });
        let t = ctx.find_node(scope, "t").unwrap();
        assert_eq!(ctx.bound_variant(t).as_deref(), Some("Primary"));
        assert_eq!(text(&ctx, t, "color"), Value::string("navy"));
        // Explicit parameters the variant does not set are ignored too.
        assert_eq!(text(&ctx, t, "text"), Value::null());
    }

    #[test]
    fn runtime_variant_override_wins() {
        let app = ComponentDocument::new("App").with_node(NodeDocument::new("t", "Text").with_variant("Primary"));
        let (mut ctx, scope) = context(GraphDocument {
            components: vec![app],
            variants: vec![
                VariantRecord::new("Text", "Primary").with_parameter("size", json!(20)),
                VariantRecord::new("Text", "Compact").with_parameter("text", json!("small")),
            ],
            ..GraphDocument::default()
        });
        let t = ctx.find_node(scope, "t").unwrap();

        ctx.set_node_variant(t, Some("Compact")).unwrap();
        ctx.update();
        assert_eq!(ctx.bound_variant(t).as_deref(), Some("Compact"));
        assert_eq!(text(&ctx, t, "text"), Value::string("small"));
        // Size lost its variant value and is back to the default.
        assert_eq!(text(&ctx, t, "size"), Value::unit(12.0, "px"));
        assert_eq!(ctx.variant_instances("Text", "Primary"), Vec::<NodeKey>::new());
    }
}
