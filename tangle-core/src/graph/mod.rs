//! Live Graph
//!
//! This module holds the runtime side of a graph: live node instances, their
//! output edges, the handle node behaviors use to talk to the runtime, and
//! the scheduler that queues deferred work.
//!
//! # Evaluation Model
//!
//! Propagation is push-on-write, pull-on-read:
//!
//! - Writing an input queues the value and marks the node dirty.
//! - Evaluating a node first evaluates its dirty dependencies, then drains
//!   its queued inputs round-robin through the input setters.
//! - A setter that flags an output causes the output getter to be read and
//!   the value to be queued on every consumer.
//!
//! Cycles are not rejected. Each node counts its evaluations and sends per
//! update iteration; a node exceeding either limit is parked until the next
//! frame and a warning is reported once.

mod edge_trigger;
mod io;
mod kind;
mod node;
mod output;
mod scheduler;

pub use edge_trigger::edge_triggered;
pub(crate) use io::Effect;
pub use io::NodeIo;
pub use kind::{ComponentInstance, NodeKind};
pub use node::{
    Completion, CycleGuard, Evaluation, IdGenerator, InputPort, Internals, Node, NodeId,
    NodeKey, NodeState, ScopeId,
};
pub use output::{Consumer, OutputEdge};
pub use scheduler::{CycleHook, DebugHooks, FrameHook, Scheduler, Task, ValueHook};
