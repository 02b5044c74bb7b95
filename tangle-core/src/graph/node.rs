//! Graph Nodes
//!
//! This module defines the live node instances that make up a running graph,
//! their identifiers, and the per-node state machine that drives evaluation
//! and cycle containment.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use smallvec::SmallVec;

use super::kind::NodeKind;
use super::output::OutputEdge;
use crate::registry::{InputDef, OutputDef};
use crate::value::Value;

/// Identifier of a live node, unique within one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of a scope, unique within one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ScopeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Address of a live node: the scope that owns it and its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub scope: ScopeId,
    pub node: NodeId,
}

impl NodeKey {
    pub fn new(scope: ScopeId, node: NodeId) -> Self {
        Self { scope, node }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.0, self.node.0)
    }
}

/// Hands out node and scope ids for one execution context.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_id(&mut self) -> NodeId {
        self.next += 1;
        NodeId(self.next)
    }

    pub fn scope_id(&mut self) -> ScopeId {
        self.next += 1;
        ScopeId(self.next)
    }

    /// A fresh id for anything else the context hands out.
    pub fn next_raw(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// Evaluation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No pending input changes.
    Clean,

    /// Inputs are queued; the node is waiting for evaluation.
    Dirty,

    /// The node is resolving its dependencies or draining its inputs.
    Evaluating,

    /// The node exceeded an iteration or send limit and is parked until the
    /// next frame.
    CycleDetected,
}

/// Outcome of asking a node to start evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Proceed,
    Skip,
    CycleDetected,
}

/// Outcome of finishing an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Clean,
    /// New input arrived during evaluation; evaluate again.
    Again,
    CycleDetected,
}

/// Per-node state machine with the two cycle breakers: an evaluation counter
/// and an output send counter, both reset when the update iteration changes.
#[derive(Debug, Clone)]
pub struct CycleGuard {
    state: NodeState,
    iteration: u64,
    evaluations: u32,
    sends: u32,
    send_limit_hit: bool,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self {
            state: NodeState::Clean,
            iteration: 0,
            evaluations: 0,
            sends: 0,
            send_limit_hit: false,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == NodeState::Dirty
    }

    /// Mark the node as having pending input.
    ///
    /// Returns `true` when the node went from clean to dirty and therefore
    /// needs to be scheduled.
    pub fn mark_dirty(&mut self) -> bool {
        if self.state == NodeState::Clean {
            self.state = NodeState::Dirty;
            true
        } else {
            false
        }
    }

    fn roll(&mut self, iteration: u64) {
        if self.iteration != iteration {
            self.iteration = iteration;
            self.evaluations = 0;
            self.sends = 0;
        }
    }

    /// Start an evaluation within `iteration`.
    pub fn begin(&mut self, iteration: u64, max_evaluations: u32) -> Evaluation {
        if self.state != NodeState::Dirty {
            return Evaluation::Skip;
        }
        self.roll(iteration);
        self.evaluations += 1;
        if self.evaluations > max_evaluations {
            self.state = NodeState::CycleDetected;
            return Evaluation::CycleDetected;
        }
        self.state = NodeState::Evaluating;
        Evaluation::Proceed
    }

    /// Finish an evaluation; `pending` reports input that arrived meanwhile.
    pub fn finish(&mut self, pending: bool) -> Completion {
        if self.send_limit_hit {
            self.send_limit_hit = false;
            self.state = NodeState::CycleDetected;
            return Completion::CycleDetected;
        }
        if pending {
            self.state = NodeState::Dirty;
            Completion::Again
        } else {
            self.state = NodeState::Clean;
            Completion::Clean
        }
    }

    /// Abandon an evaluation that failed before draining; the node stays dirty.
    pub fn abort(&mut self) {
        if self.state == NodeState::Evaluating {
            self.state = NodeState::Dirty;
        }
    }

    /// Count one sent value. Returns `false` once the limit is exceeded.
    pub fn record_send(&mut self, iteration: u64, max_sends: u32) -> bool {
        if self.state == NodeState::CycleDetected {
            return false;
        }
        self.roll(iteration);
        self.sends += 1;
        if self.sends > max_sends {
            if self.state == NodeState::Evaluating {
                self.send_limit_hit = true;
            } else {
                self.state = NodeState::CycleDetected;
            }
            return false;
        }
        true
    }

    /// Leave the parked state at the start of a new frame.
    ///
    /// Returns `true` when the node is dirty again and must be scheduled.
    pub fn resume(&mut self) -> bool {
        if self.state != NodeState::CycleDetected {
            return false;
        }
        self.state = NodeState::Dirty;
        self.evaluations = 0;
        self.sends = 0;
        true
    }
}

impl Default for CycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Private, per-node storage used by node behaviors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Internals(IndexMap<String, Value>);

impl Internals {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Numeric value of `name`, `0.0` when missing or non-numeric.
    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(Value::as_number).unwrap_or(0.0)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).is_some_and(Value::as_bool)
    }

    /// Clone of `name`, null when missing.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }
}

/// One registered input: its declaration, queued values and resolved value.
#[derive(Clone)]
pub struct InputPort {
    pub(crate) def: InputDef,
    queue: SmallVec<[Value; 2]>,
    value: Option<Value>,
    pub(crate) connections: usize,

    /// Last boolean level seen by an edge-triggered setter.
    pub(crate) level: bool,
}

impl InputPort {
    pub fn new(def: InputDef) -> Self {
        Self {
            def,
            queue: SmallVec::new(),
            value: None,
            connections: 0,
            level: false,
        }
    }

    pub fn def(&self) -> &InputDef {
        &self.def
    }

    /// The value most recently applied through the setter.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("queued", &self.queue.len())
            .field("value", &self.value)
            .field("connections", &self.connections)
            .finish()
    }
}

/// A live node instance, exclusively owned by the scope that created it.
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) record_id: String,
    pub(crate) type_name: String,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: IndexMap<String, InputPort>,
    pub(crate) outputs: IndexMap<String, OutputEdge>,
    pub(crate) internals: Internals,
    pub(crate) guard: CycleGuard,

    /// Source nodes of incoming connections, one entry per connection.
    pub(crate) dependencies: Vec<NodeKey>,

    /// Position in the owning component's node tree.
    pub(crate) tree_parent: Option<NodeId>,
    pub(crate) tree_children: Vec<NodeId>,

    /// Position in the rendered tree; may cross scopes.
    pub(crate) visual_parent: Option<NodeKey>,
    pub(crate) visual_children: Vec<NodeKey>,
    pub(crate) render_cache_valid: bool,

    pub(crate) visual_state: Option<String>,
    pub(crate) variant_override: Option<String>,
}

impl Node {
    pub(crate) fn new(key: NodeKey, record_id: &str, type_name: &str, kind: NodeKind) -> Self {
        Self {
            key,
            record_id: record_id.to_string(),
            type_name: type_name.to_string(),
            kind,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            internals: Internals::default(),
            guard: CycleGuard::new(),
            dependencies: Vec::new(),
            tree_parent: None,
            tree_children: Vec::new(),
            visual_parent: None,
            visual_children: Vec::new(),
            render_cache_valid: false,
            visual_state: None,
            variant_override: None,
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn state(&self) -> NodeState {
        self.guard.state()
    }

    pub fn is_cyclic(&self) -> bool {
        self.guard.state() == NodeState::CycleDetected
    }

    pub fn internals(&self) -> &Internals {
        &self.internals
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputEdge> {
        self.outputs.get(name)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// The value last applied to input `name`.
    pub fn input_value(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(InputPort::value)
    }

    pub fn dependencies(&self) -> &[NodeKey] {
        &self.dependencies
    }

    pub fn visual_parent(&self) -> Option<NodeKey> {
        self.visual_parent
    }

    pub fn visual_children(&self) -> &[NodeKey] {
        &self.visual_children
    }

    pub fn visual_state(&self) -> Option<&str> {
        self.visual_state.as_deref()
    }

    pub fn render_cache_valid(&self) -> bool {
        self.render_cache_valid
    }

    /// Declare an input. An existing registration wins.
    pub fn register_input(&mut self, name: impl Into<String>, def: InputDef) {
        self.inputs.entry(name.into()).or_insert_with(|| InputPort::new(def));
    }

    /// Declare an output. An existing registration wins.
    pub fn register_output(&mut self, name: impl Into<String>, def: OutputDef) {
        self.outputs
            .entry(name.into())
            .or_insert_with(|| OutputEdge::new(def));
    }

    pub fn unregister_input(&mut self, name: &str) -> Option<InputPort> {
        self.inputs.shift_remove(name)
    }

    pub fn unregister_output(&mut self, name: &str) -> Option<OutputEdge> {
        self.outputs.shift_remove(name)
    }

    /// Queue a value on input `name`, applying unit preservation.
    ///
    /// Returns `false` when the input is not registered.
    pub fn queue_input(&mut self, name: &str, value: Value) -> bool {
        let Some(port) = self.inputs.get_mut(name) else {
            return false;
        };
        let previous = port.queue.last().or(port.value.as_ref());
        let value = value.coerce_with_previous(previous, port.def.unit.as_deref());
        port.queue.push(value);
        true
    }

    pub fn has_queued_input(&self) -> bool {
        self.inputs.values().any(|port| !port.queue.is_empty())
    }

    /// Take one queued value from every input that has one, highest input
    /// priority first. Equal priorities keep registration order.
    pub(crate) fn take_input_round(&mut self) -> Vec<(String, Value)> {
        let mut round: Vec<(i32, String, Value)> = self
            .inputs
            .iter_mut()
            .filter(|(_, port)| !port.queue.is_empty())
            .map(|(name, port)| (port.def.priority, name.clone(), port.queue.remove(0)))
            .collect();
        round.sort_by_key(|(priority, _, _)| std::cmp::Reverse(*priority));
        round.into_iter().map(|(_, name, value)| (name, value)).collect()
    }

    pub(crate) fn set_resolved(&mut self, name: &str, value: Value) {
        if let Some(port) = self.inputs.get_mut(name) {
            port.value = Some(value);
        }
    }

    /// Read output `port` through the node's getter.
    pub fn output_value(&self, port: &str) -> Value {
        match &self.kind {
            NodeKind::Defined(def) => match def.output_def(port).and_then(|o| o.getter()) {
                Some(get) => get(&self.internals),
                None => self.internals.value(port),
            },
            NodeKind::ComponentInputs | NodeKind::ComponentChildren => self.internals.value(port),
            NodeKind::ComponentOutputs => Value::null(),
            NodeKind::ComponentInstance(instance) => instance.output_value(port),
        }
    }

    /// Snapshot of the node for inspectors and debugging.
    pub fn serialize(&self) -> serde_json::Value {
        let inputs: serde_json::Map<String, serde_json::Value> = self
            .inputs
            .iter()
            .filter_map(|(name, port)| port.value.as_ref().map(|v| (name.clone(), v.to_json())))
            .collect();
        let outputs: serde_json::Map<String, serde_json::Value> = self
            .outputs
            .keys()
            .map(|name| (name.clone(), self.output_value(name).to_json()))
            .collect();
        serde_json::json!({
            "id": self.record_id,
            "type": self.type_name,
            "kind": self.kind.label(),
            "state": format!("{:?}", self.guard.state()),
            "inputs": inputs,
            "outputs": outputs,
            "internals": self.internals,
        })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("record_id", &self.record_id)
            .field("type_name", &self.type_name)
            .field("state", &self.guard.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortType;

    fn key() -> NodeKey {
        NodeKey::new(ScopeId(1), NodeId(2))
    }

    #[test]
    fn id_generator_hands_out_unique_ids() {
        let mut ids = IdGenerator::new();
        let a = ids.node_id();
        let b = ids.node_id();
        let s = ids.scope_id();
        assert_ne!(a, b);
        assert_ne!(a.raw(), s.raw());
    }

    #[test]
    fn guard_starts_clean_and_schedules_once() {
        let mut guard = CycleGuard::new();
        assert_eq!(guard.state(), NodeState::Clean);
        assert!(guard.mark_dirty());
        assert!(!guard.mark_dirty());
        assert_eq!(guard.state(), NodeState::Dirty);
    }

    #[test]
    fn guard_evaluation_transitions() {
        let mut guard = CycleGuard::new();
        assert_eq!(guard.begin(1, 100), Evaluation::Skip);

        guard.mark_dirty();
        assert_eq!(guard.begin(1, 100), Evaluation::Proceed);
        assert_eq!(guard.state(), NodeState::Evaluating);
        assert!(!guard.mark_dirty());

        assert_eq!(guard.finish(true), Completion::Again);
        assert_eq!(guard.state(), NodeState::Dirty);
        assert_eq!(guard.begin(1, 100), Evaluation::Proceed);
        assert_eq!(guard.finish(false), Completion::Clean);
        assert_eq!(guard.state(), NodeState::Clean);
    }

    #[test]
    fn guard_detects_cycles_by_evaluation_count() {
        let mut guard = CycleGuard::new();
        for _ in 0..3 {
            guard.mark_dirty();
            assert_eq!(guard.begin(7, 3), Evaluation::Proceed);
            guard.finish(false);
        }
        guard.mark_dirty();
        assert_eq!(guard.begin(7, 3), Evaluation::CycleDetected);
        assert_eq!(guard.state(), NodeState::CycleDetected);

        // Parked nodes ignore new input until resumed.
        assert!(!guard.mark_dirty());
        assert!(guard.resume());
        assert_eq!(guard.begin(8, 3), Evaluation::Proceed);
    }

    #[test]
    fn counters_reset_on_new_iteration() {
        let mut guard = CycleGuard::new();
        for iteration in 0..10 {
            guard.mark_dirty();
            assert_eq!(guard.begin(iteration, 1), Evaluation::Proceed);
            guard.finish(false);
        }
    }

    #[test]
    fn send_limit_parks_node_after_evaluation() {
        let mut guard = CycleGuard::new();
        guard.mark_dirty();
        guard.begin(1, 100);
        assert!(guard.record_send(1, 2));
        assert!(guard.record_send(1, 2));
        assert!(!guard.record_send(1, 2));
        assert_eq!(guard.state(), NodeState::Evaluating);
        assert_eq!(guard.finish(false), Completion::CycleDetected);
        assert!(!guard.record_send(1, 2));
    }

    #[test]
    fn queued_inputs_drain_round_robin() {
        let mut node = Node::new(key(), "n", "Test", NodeKind::ComponentChildren);
        node.register_input("a", InputDef::new(PortType::Number));
        node.register_input("b", InputDef::new(PortType::Number));

        node.queue_input("a", Value::number(1.0));
        node.queue_input("a", Value::number(2.0));
        node.queue_input("b", Value::number(10.0));
        assert!(!node.queue_input("missing", Value::number(0.0)));

        let first = node.take_input_round();
        assert_eq!(
            first,
            vec![("a".to_string(), Value::number(1.0)), ("b".to_string(), Value::number(10.0))]
        );
        let second = node.take_input_round();
        assert_eq!(second, vec![("a".to_string(), Value::number(2.0))]);
        assert!(!node.has_queued_input());
    }

    #[test]
    fn queued_numbers_keep_the_input_unit() {
        let mut node = Node::new(key(), "n", "Test", NodeKind::ComponentChildren);
        node.register_input("width", InputDef::new(PortType::Number).unit("px"));
        node.queue_input("width", Value::unit(50.0, "%"));
        node.queue_input("width", Value::number(20.0));

        let values: Vec<Value> = std::iter::from_fn(|| node.take_input_round().pop().map(|(_, v)| v)).collect();
        assert_eq!(values, vec![Value::unit(50.0, "%"), Value::unit(20.0, "%")]);
    }

    #[test]
    fn first_registration_wins() {
        let mut node = Node::new(key(), "n", "Test", NodeKind::ComponentChildren);
        node.register_input("a", InputDef::new(PortType::Number).priority(5));
        node.register_input("a", InputDef::new(PortType::String));
        assert_eq!(node.input("a").unwrap().def().priority, 5);
    }
}
