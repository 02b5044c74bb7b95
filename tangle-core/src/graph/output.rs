//! Output Edges
//!
//! An output keeps the list of inputs it feeds. Values are pulled from the
//! owning node's getter at send time and pushed into every consumer's input
//! queue.

use smallvec::SmallVec;

use super::node::NodeKey;
use crate::registry::OutputDef;

/// One downstream input fed by an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub node: NodeKey,
    pub port: String,
}

impl Consumer {
    pub fn new(node: NodeKey, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

/// A registered output and the connections leaving it.
#[derive(Clone)]
pub struct OutputEdge {
    pub(crate) def: OutputDef,
    consumers: SmallVec<[Consumer; 4]>,

    /// Set between the rising and falling edge of a signal.
    pub(crate) signal_in_flight: bool,
}

impl OutputEdge {
    pub fn new(def: OutputDef) -> Self {
        Self {
            def,
            consumers: SmallVec::new(),
            signal_in_flight: false,
        }
    }

    pub fn def(&self) -> &OutputDef {
        &self.def
    }

    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    pub fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }

    pub fn signal_in_flight(&self) -> bool {
        self.signal_in_flight
    }

    /// Add a consumer. The same input may be fed more than once.
    pub(crate) fn add_consumer(&mut self, consumer: Consumer) {
        self.consumers.push(consumer);
    }

    /// Remove one matching consumer. Returns `false` if none matched.
    pub(crate) fn remove_consumer(&mut self, node: NodeKey, port: &str) -> bool {
        match self
            .consumers
            .iter()
            .position(|c| c.node == node && c.port == port)
        {
            Some(index) => {
                self.consumers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every consumer belonging to `node`.
    pub(crate) fn remove_node(&mut self, node: NodeKey) -> usize {
        let before = self.consumers.len();
        self.consumers.retain(|c| c.node != node);
        before - self.consumers.len()
    }
}

impl std::fmt::Debug for OutputEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputEdge")
            .field("consumers", &self.consumers)
            .field("signal_in_flight", &self.signal_in_flight)
            .finish()
    }
}
