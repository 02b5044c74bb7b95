//! Execution Context
//!
//! The [`ExecutionContext`] owns everything that is alive while a project
//! runs: the graph model, the node registry, the scopes with their nodes,
//! the scheduler and the bundle loader.
//!
//! # Frames
//!
//! The host drives the context by calling [`ExecutionContext::update`] once
//! per frame. A frame:
//!
//! 1. advances the frame counter and runs tasks deferred to this frame,
//! 2. drains the worklist of dirty nodes, together with after-update
//!    callbacks, in bounded passes,
//! 3. fires due timers and repeats step 2 while work remains.
//!
//! # Edits
//!
//! Edits to the running project go through [`ExecutionContext::apply`]. The
//! delta is committed to the graph model first; the resulting events are
//! then mirrored onto every live scope of the affected component.
//!
//! # Ownership
//!
//! A scope owns its nodes in an arena of slots. A node being evaluated is
//! taken out of its slot for the duration; values sent to it meanwhile are
//! held back and delivered when it is put back.

mod evaluate;
mod events;
mod instance;
mod mirror;
mod parameters;
mod scope;
mod wiring;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, error, info_span, warn};

pub use events::{EventHandler, Propagation, ReceiverId};
pub use scope::Scope;

use crate::bundle::BundleLoader;
use crate::config::RuntimeConfig;
use crate::error::{Error, RuntimeError};
use crate::graph::{DebugHooks, IdGenerator, Node, NodeKey, Scheduler, ScopeId, Task};
use crate::model::{GraphDelta, GraphEvent, GraphModel, ListenerId, Listeners};
use crate::registry::{NodeDefinition, NodeRegistry};
use crate::value::Value;

/// Lifecycle notifications from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    ScopeCreated {
        scope: ScopeId,
        component: String,
    },
    ScopeDisposed {
        scope: ScopeId,
        component: String,
    },
    /// A node subtree was deleted; `ids` lists it children first.
    NodeRemoved {
        scope: ScopeId,
        record_id: String,
        ids: Vec<String>,
    },
    /// A node was parked for exceeding an iteration or send limit.
    CycleDetected {
        node: NodeKey,
        type_name: String,
        record_id: String,
    },
}

/// Work held back for a node that was taken out of its slot.
#[derive(Debug, Clone)]
pub(crate) enum Deferred {
    Input { port: String, value: Value },
    OwnerOutput { port: String, value: Value },
}

/// The live runtime of a project.
pub struct ExecutionContext {
    pub(crate) config: RuntimeConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) registry: NodeRegistry,
    pub(crate) graph: GraphModel,
    pub(crate) scopes: IndexMap<ScopeId, Scope>,
    pub(crate) ids: IdGenerator,
    pub(crate) deferred: HashMap<NodeKey, Vec<Deferred>>,
    pub(crate) bundles: Option<BundleLoader>,
    pub(crate) events: Listeners<RuntimeEvent>,
}

impl ExecutionContext {
    /// Create a context for `graph` with an empty registry.
    pub fn new(graph: GraphModel) -> Self {
        Self::with_registry(graph, NodeRegistry::new())
    }

    pub fn with_registry(graph: GraphModel, registry: NodeRegistry) -> Self {
        let config = RuntimeConfig::from_settings(graph.settings());
        Self {
            config,
            scheduler: Scheduler::new(),
            registry,
            graph,
            scopes: IndexMap::new(),
            ids: IdGenerator::new(),
            deferred: HashMap::new(),
            bundles: None,
            events: Listeners::new(),
        }
    }

    /// Fetch missing components through `loader`.
    pub fn with_bundle_loader(mut self, loader: BundleLoader) -> Self {
        self.bundles = Some(loader);
        self
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RuntimeConfig) {
        self.config = config;
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn hooks_mut(&mut self) -> &mut DebugHooks {
        &mut self.scheduler.hooks
    }

    pub fn frame(&self) -> u64 {
        self.scheduler.frame()
    }

    /// Register a node type and run its setup hook.
    pub fn register_type(&mut self, definition: NodeDefinition) -> Arc<NodeDefinition> {
        if let Some(setup) = definition.setup_fn() {
            setup(&mut self.scheduler, &self.graph);
        }
        self.registry.register(definition)
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.scopes.get(&key.scope)?.nodes.get(&key.node)?.as_ref()
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    /// Key of the node built from record `record_id` in `scope`.
    pub fn find_node(&self, scope: ScopeId, record_id: &str) -> Option<NodeKey> {
        self.scopes.get(&scope)?.node_key(record_id)
    }

    /// Current value of output `port`, read through the node's getter.
    pub fn output_value(&self, key: NodeKey, port: &str) -> Option<Value> {
        let node = self.node(key)?;
        node.output(port).map(|_| node.output_value(port))
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.scheduler.global(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.scheduler.set_global(name, value);
    }

    pub fn schedule_timer(&mut self, delay: Duration, task: Task) {
        self.scheduler.schedule_timer(delay, task);
    }

    pub fn schedule_after_update(&mut self, task: Task) {
        self.scheduler.schedule_after_update(task);
    }

    pub fn schedule_next_frame(&mut self, task: Task) {
        self.scheduler.schedule_next_frame(task);
    }

    pub fn warn_once(&mut self, key: impl Into<String>, message: &str) -> bool {
        self.scheduler.warn_once(key, message)
    }

    /// Run one frame.
    pub fn update(&mut self) {
        let frame = self.scheduler.advance_frame();
        let span = info_span!("frame", frame);
        let _guard = span.enter();

        if let Some(hook) = self.scheduler.hooks.on_frame_start.as_mut() {
            hook(frame);
        }

        for task in self.scheduler.take_next_frame() {
            task(self);
        }

        let mut waves = 0;
        loop {
            self.update_dirty_nodes();
            for task in self.scheduler.take_due_timers(Instant::now()) {
                task(self);
            }
            waves += 1;
            if !self.scheduler.has_pending_work() {
                break;
            }
            if waves >= self.config.max_frame_waves {
                warn!(waves, "frame ended with pending work");
                break;
            }
        }

        if let Some(hook) = self.scheduler.hooks.on_frame_end.as_mut() {
            hook(frame);
        }
    }

    /// Drain the worklist and after-update callbacks.
    ///
    /// Runs at most `max_scheduler_passes` passes. A failing node is logged
    /// and does not stop the others.
    pub fn update_dirty_nodes(&mut self) {
        for pass in 0..self.config.max_scheduler_passes {
            let batch = self.scheduler.take_worklist();
            for key in batch {
                if let Err(err) = self.update_node(key) {
                    error!(node = %key, error = %err, "node update failed");
                }
            }

            for task in self.scheduler.take_after_update() {
                task(self);
            }

            if !self.scheduler.has_pending_work() {
                return;
            }
            debug!(pass, pending = self.scheduler.pending_nodes(), "worklist pass left work");
        }
    }

    /// Commit `delta` to the graph model and mirror it onto live scopes.
    pub fn apply(&mut self, delta: GraphDelta) -> Result<Vec<GraphEvent>, Error> {
        self.apply_batch(vec![delta])
    }

    /// Commit `deltas` atomically and mirror the resulting events.
    pub fn apply_batch(&mut self, deltas: Vec<GraphDelta>) -> Result<Vec<GraphEvent>, Error> {
        let events = self.graph.apply_batch(deltas)?;
        for event in &events {
            self.mirror(event);
        }
        self.update();
        Ok(events)
    }

    /// Write `value` to input `port` of a live node, as a connection would.
    pub fn set_input(&mut self, key: NodeKey, port: &str, value: Value) -> Result<(), RuntimeError> {
        if self.node(key).is_none() {
            return Err(RuntimeError::NodeNotFound(key.to_string()));
        }
        self.ensure_input(key, port)?;
        self.deliver_input(key, port, value);
        Ok(())
    }

    /// Mark the rendered state of `key` as current.
    pub fn mark_rendered(&mut self, key: NodeKey) {
        if let Some(node) = self.node_mut(key) {
            node.render_cache_valid = true;
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("scopes", &self.scopes.len())
            .field("types", &self.registry.len())
            .finish()
    }
}
