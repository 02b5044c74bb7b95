//! Node Definitions
//!
//! A [`NodeDefinition`] declares a node type: its inputs with their setters,
//! its outputs with their getters, numbered input families, callable
//! methods and lifecycle hooks.
//!
//! # Example
//!
//! ```
//! use tangle_core::model::PortType;
//! use tangle_core::registry::{InputDef, NodeDefinition, OutputDef};
//! use tangle_core::Value;
//!
//! let double = NodeDefinition::new("Double")
//!     .category("Math")
//!     .input(
//!         "value",
//!         InputDef::new(PortType::Number).set(|io, v| {
//!             let n = v.as_number().unwrap_or(0.0);
//!             io.internals_mut().set("result", Value::number(n * 2.0));
//!             io.flag_output_dirty("result");
//!             Ok(())
//!         }),
//!     )
//!     .output("result", OutputDef::new(PortType::Number).get(|i| i.value("result")));
//!
//! assert!(double.resolve_input("value").is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::graph::{Internals, NodeIo, Scheduler};
use crate::model::{GraphModel, PortType};
use crate::value::Value;

/// Input setter. An error aborts the node's current update.
pub type SetFn = Arc<dyn Fn(&mut NodeIo<'_>, Value) -> Result<(), String> + Send + Sync>;

/// Output getter, read whenever the output is propagated.
pub type GetFn = Arc<dyn Fn(&Internals) -> Value + Send + Sync>;

/// Method callable from outside the graph.
pub type MethodFn = Arc<dyn Fn(&mut NodeIo<'_>, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Lifecycle hook.
pub type HookFn = Arc<dyn Fn(&mut NodeIo<'_>) + Send + Sync>;

/// Type-level setup, run once when the definition is registered.
pub type SetupFn = Arc<dyn Fn(&mut Scheduler, &GraphModel) + Send + Sync>;

/// Declaration of one input.
#[derive(Clone)]
pub struct InputDef {
    pub port_type: PortType,
    pub default: Option<Json>,
    pub unit: Option<String>,
    /// Higher priorities are applied first when parameters are set together.
    pub priority: i32,
    pub(crate) setter: Option<SetFn>,
}

impl InputDef {
    pub fn new(port_type: PortType) -> Self {
        Self {
            port_type,
            default: None,
            unit: None,
            priority: 0,
            setter: None,
        }
    }

    pub fn default_value(mut self, default: Json) -> Self {
        self.default = Some(default);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn set<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut NodeIo<'_>, Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Use a prebuilt setter, such as one from [`crate::graph::edge_triggered`].
    pub fn setter(mut self, setter: SetFn) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }
}

impl fmt::Debug for InputDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputDef")
            .field("port_type", &self.port_type)
            .field("default", &self.default)
            .field("unit", &self.unit)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Declaration of one output.
#[derive(Clone)]
pub struct OutputDef {
    pub port_type: PortType,
    pub(crate) getter: Option<GetFn>,
}

impl OutputDef {
    pub fn new(port_type: PortType) -> Self {
        Self {
            port_type,
            getter: None,
        }
    }

    pub fn get<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Internals) -> Value + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn getter(&self) -> Option<&GetFn> {
        self.getter.as_ref()
    }
}

impl fmt::Debug for OutputDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDef")
            .field("port_type", &self.port_type)
            .finish()
    }
}

/// A family of inputs named `"{prefix} {n}"`, registered on first use.
#[derive(Debug, Clone)]
pub struct NumberedInput {
    pub prefix: String,
    pub def: InputDef,
}

impl NumberedInput {
    /// Whether `name` belongs to this family.
    pub fn matches(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(' '))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Declarative description of a node type.
#[derive(Clone)]
pub struct NodeDefinition {
    pub name: String,
    pub category: String,
    inputs: IndexMap<String, InputDef>,
    outputs: IndexMap<String, OutputDef>,
    numbered_inputs: Vec<NumberedInput>,
    methods: IndexMap<String, MethodFn>,
    initialize: Option<HookFn>,
    after_inputs_updated: Option<HookFn>,
    on_delete: Option<HookFn>,
    setup: Option<SetupFn>,
}

impl NodeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            numbered_inputs: Vec::new(),
            methods: IndexMap::new(),
            initialize: None,
            after_inputs_updated: None,
            on_delete: None,
            setup: None,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Declare an input. The first declaration of a name wins.
    pub fn input(mut self, name: impl Into<String>, def: InputDef) -> Self {
        self.inputs.entry(name.into()).or_insert(def);
        self
    }

    pub fn output(mut self, name: impl Into<String>, def: OutputDef) -> Self {
        self.outputs.entry(name.into()).or_insert(def);
        self
    }

    pub fn numbered_input(mut self, prefix: impl Into<String>, def: InputDef) -> Self {
        self.numbered_inputs.push(NumberedInput {
            prefix: prefix.into(),
            def,
        });
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut NodeIo<'_>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Run once per node, right after its ports are registered.
    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut NodeIo<'_>) + Send + Sync + 'static,
    {
        self.initialize = Some(Arc::new(hook));
        self
    }

    /// Run after every round of input setters.
    pub fn on_inputs_updated<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut NodeIo<'_>) + Send + Sync + 'static,
    {
        self.after_inputs_updated = Some(Arc::new(hook));
        self
    }

    pub fn on_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut NodeIo<'_>) + Send + Sync + 'static,
    {
        self.on_delete = Some(Arc::new(hook));
        self
    }

    pub fn on_setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&mut Scheduler, &GraphModel) + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(setup));
        self
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&str, &InputDef)> {
        self.inputs.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &OutputDef)> {
        self.outputs.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn output_def(&self, name: &str) -> Option<&OutputDef> {
        self.outputs.get(name)
    }

    /// Find the declaration for input `name`, including numbered families.
    pub fn resolve_input(&self, name: &str) -> Option<&InputDef> {
        self.inputs.get(name).or_else(|| {
            self.numbered_inputs
                .iter()
                .find(|family| family.matches(name))
                .map(|family| &family.def)
        })
    }

    /// Priority of input `name`, `0` for unknown inputs.
    pub fn input_priority(&self, name: &str) -> i32 {
        self.resolve_input(name).map(|d| d.priority).unwrap_or(0)
    }

    pub fn method_fn(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub(crate) fn initialize_hook(&self) -> Option<&HookFn> {
        self.initialize.as_ref()
    }

    pub(crate) fn inputs_updated_hook(&self) -> Option<&HookFn> {
        self.after_inputs_updated.as_ref()
    }

    pub(crate) fn delete_hook(&self) -> Option<&HookFn> {
        self.on_delete.as_ref()
    }

    pub(crate) fn setup_fn(&self) -> Option<&SetupFn> {
        self.setup.as_ref()
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbered_inputs_match_by_prefix_and_index() {
        let family = NumberedInput {
            prefix: "Item".into(),
            def: InputDef::new(PortType::Any),
        };
        assert!(family.matches("Item 1"));
        assert!(family.matches("Item 42"));
        assert!(!family.matches("Item"));
        assert!(!family.matches("Item x"));
        assert!(!family.matches("Items 1"));
    }

    #[test]
    fn resolve_prefers_exact_inputs() {
        let def = NodeDefinition::new("List")
            .input("Item 1", InputDef::new(PortType::String).priority(9))
            .numbered_input("Item", InputDef::new(PortType::Any).priority(1));
        assert_eq!(def.input_priority("Item 1"), 9);
        assert_eq!(def.input_priority("Item 2"), 1);
        assert_eq!(def.input_priority("Other"), 0);
        assert!(def.resolve_input("Other").is_none());
    }

    #[test]
    fn first_declared_input_wins() {
        let def = NodeDefinition::new("Twice")
            .input("a", InputDef::new(PortType::Number).default_value(json!(1)))
            .input("a", InputDef::new(PortType::String).default_value(json!("x")));
        let (_, a) = def.inputs().next().unwrap();
        assert_eq!(a.default, Some(json!(1)));
        assert_eq!(def.inputs().count(), 1);
    }

    #[test]
    fn builder_records_hooks_and_methods() {
        let def = NodeDefinition::new("Timer")
            .category("Utilities")
            .method("reset", |_, _| Ok(Value::null()))
            .on_initialize(|_| {})
            .on_delete(|_| {})
            .on_setup(|_, _| {});
        assert_eq!(def.category, "Utilities");
        assert!(def.method_fn("reset").is_some());
        assert!(def.initialize_hook().is_some());
        assert!(def.delete_hook().is_some());
        assert!(def.setup_fn().is_some());
        assert!(def.inputs_updated_hook().is_none());
    }
}
