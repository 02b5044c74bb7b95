//! Update Scheduler
//!
//! The scheduler holds every piece of deferred work of an execution context:
//!
//! - the worklist of dirty nodes waiting for evaluation,
//! - callbacks to run after the current worklist pass,
//! - tasks deferred to the next frame,
//! - timers.
//!
//! It also carries the frame counter, shared globals, debug hooks and the
//! set of warnings already reported.
//!
//! # Suppressed Propagation
//!
//! While a scope is being built, nodes marked dirty are parked instead of
//! being added to the worklist. They are released in one batch when the
//! outermost suppression ends, so that evaluation starts only after all
//! nodes and connections exist.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use super::node::NodeKey;
use crate::runtime::ExecutionContext;
use crate::value::Value;

/// Deferred work run against the execution context.
pub type Task = Box<dyn FnOnce(&mut ExecutionContext) + Send>;

/// Observer called with the frame counter.
pub type FrameHook = Box<dyn FnMut(u64) + Send>;

/// Observer called for every value pushed along a connection.
pub type ValueHook = Box<dyn FnMut(NodeKey, &str, &Value) + Send>;

/// Observer called the first time a node is parked by the cycle guard.
pub type CycleHook = Box<dyn FnMut(NodeKey) + Send>;

/// Optional observers for inspectors and tests.
#[derive(Default)]
pub struct DebugHooks {
    pub on_frame_start: Option<FrameHook>,
    pub on_frame_end: Option<FrameHook>,
    pub on_value_sent: Option<ValueHook>,
    pub on_cycle_detected: Option<CycleHook>,
}

impl fmt::Debug for DebugHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugHooks")
            .field("on_frame_start", &self.on_frame_start.is_some())
            .field("on_frame_end", &self.on_frame_end.is_some())
            .field("on_value_sent", &self.on_value_sent.is_some())
            .field("on_cycle_detected", &self.on_cycle_detected.is_some())
            .finish()
    }
}

struct Timer {
    due: Instant,
    task: Task,
}

/// Worklist and deferred task queues.
#[derive(Default)]
pub struct Scheduler {
    worklist: Vec<NodeKey>,
    after_update: VecDeque<Task>,
    next_frame: Vec<Task>,
    timers: Vec<Timer>,
    frame: u64,
    suppress_depth: u32,
    suppressed: Vec<NodeKey>,
    globals: IndexMap<String, Value>,
    warnings: IndexSet<String>,
    pub hooks: DebugHooks,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame counter; also the update iteration used by the cycle guards.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn advance_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    /// Schedule a node that just became dirty.
    pub fn schedule_dirty(&mut self, key: NodeKey) {
        if self.suppress_depth > 0 {
            self.suppressed.push(key);
        } else {
            self.worklist.push(key);
        }
    }

    pub(crate) fn take_worklist(&mut self) -> Vec<NodeKey> {
        std::mem::take(&mut self.worklist)
    }

    pub fn pending_nodes(&self) -> usize {
        self.worklist.len()
    }

    /// Drop any scheduled work for a removed node.
    pub(crate) fn forget(&mut self, key: NodeKey) {
        self.worklist.retain(|k| *k != key);
        self.suppressed.retain(|k| *k != key);
    }

    /// Park dirty nodes until [`Scheduler::resume_propagation`] is called as
    /// many times as this was.
    pub fn suppress_propagation(&mut self) {
        self.suppress_depth += 1;
    }

    pub fn resume_propagation(&mut self) {
        match self.suppress_depth {
            0 => warn!("resume_propagation called without matching suppress"),
            1 => {
                self.suppress_depth = 0;
                let parked = std::mem::take(&mut self.suppressed);
                self.worklist.extend(parked);
            }
            _ => self.suppress_depth -= 1,
        }
    }

    pub fn is_propagation_suppressed(&self) -> bool {
        self.suppress_depth > 0
    }

    /// Run `task` once the current worklist pass has drained.
    pub fn schedule_after_update(&mut self, task: Task) {
        self.after_update.push_back(task);
    }

    pub(crate) fn take_after_update(&mut self) -> VecDeque<Task> {
        std::mem::take(&mut self.after_update)
    }

    /// Run `task` at the start of the next frame.
    pub fn schedule_next_frame(&mut self, task: Task) {
        self.next_frame.push(task);
    }

    pub(crate) fn take_next_frame(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.next_frame)
    }

    /// Run `task` during the first frame at least `delay` from now.
    pub fn schedule_timer(&mut self, delay: Duration, task: Task) {
        self.timers.push(Timer {
            due: Instant::now() + delay,
            task,
        });
    }

    pub(crate) fn take_due_timers(&mut self, now: Instant) -> Vec<Task> {
        let (due, pending): (Vec<Timer>, Vec<Timer>) =
            std::mem::take(&mut self.timers).into_iter().partition(|t| t.due <= now);
        self.timers = pending;
        due.into_iter().map(|t| t.task).collect()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Work that should run before the frame ends.
    pub fn has_pending_work(&self) -> bool {
        !self.worklist.is_empty() || !self.after_update.is_empty()
    }

    /// Whether anything at all is queued, including future frames.
    pub fn is_idle(&self) -> bool {
        !self.has_pending_work()
            && self.next_frame.is_empty()
            && self.timers.is_empty()
            && self.suppressed.is_empty()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Report `message` once per `key` for the lifetime of the context.
    pub fn warn_once(&mut self, key: impl Into<String>, message: &str) -> bool {
        let key = key.into();
        if self.warnings.contains(&key) {
            return false;
        }
        warn!(key = %key, "{message}");
        self.warnings.insert(key);
        true
    }

    /// Keys of the warnings reported so far.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("frame", &self.frame)
            .field("worklist", &self.worklist)
            .field("after_update", &self.after_update.len())
            .field("next_frame", &self.next_frame.len())
            .field("timers", &self.timers.len())
            .field("suppress_depth", &self.suppress_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, ScopeId};

    fn key(n: u64) -> NodeKey {
        NodeKey::new(ScopeId::from(1), NodeId::from(n))
    }

    #[test]
    fn suppressed_nodes_are_released_by_outermost_resume() {
        let mut scheduler = Scheduler::new();
        scheduler.suppress_propagation();
        scheduler.suppress_propagation();
        scheduler.schedule_dirty(key(1));
        scheduler.schedule_dirty(key(2));
        assert_eq!(scheduler.pending_nodes(), 0);

        scheduler.resume_propagation();
        assert!(scheduler.is_propagation_suppressed());
        assert_eq!(scheduler.pending_nodes(), 0);

        scheduler.resume_propagation();
        assert_eq!(scheduler.take_worklist(), vec![key(1), key(2)]);
    }

    #[test]
    fn forget_removes_scheduled_node() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_dirty(key(1));
        scheduler.schedule_dirty(key(2));
        scheduler.forget(key(1));
        assert_eq!(scheduler.take_worklist(), vec![key(2)]);
    }

    #[test]
    fn only_due_timers_are_taken() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_timer(Duration::ZERO, Box::new(|_| {}));
        scheduler.schedule_timer(Duration::from_secs(3600), Box::new(|_| {}));
        assert_eq!(scheduler.take_due_timers(Instant::now()).len(), 1);
        assert_eq!(scheduler.pending_timers(), 1);
        assert!(!scheduler.is_idle());
    }

    #[test]
    fn warnings_are_reported_once() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.warn_once("cycle:a", "cycle"));
        assert!(!scheduler.warn_once("cycle:a", "cycle"));
        assert!(scheduler.warn_once("cycle:b", "cycle"));
        assert_eq!(scheduler.warnings().count(), 2);
    }

    #[test]
    fn globals_round_trip() {
        let mut scheduler = Scheduler::new();
        scheduler.set_global("theme", Value::string("dark"));
        assert_eq!(scheduler.global("theme"), Some(&Value::string("dark")));
        assert!(scheduler.global("missing").is_none());
    }
}
