//! Declarative Graph Model
//!
//! Pure data describing what the runtime should build: components, node
//! records, connections, variants and project settings. The model knows
//! nothing about live nodes; it validates edits, keeps its invariants and
//! reports committed changes as [`GraphEvent`]s.
//!
//! # Layout
//!
//! - `port`: port declarations shared by node and component records
//! - `node`: node records and their nested document form
//! - `component`: component records and connections
//! - `variant`: shared parameter overlays
//! - `delta`: edits in, events out
//! - `graph`: the project-level model and import document
//! - `listener`: change-notification registry

mod component;
mod delta;
mod graph;
mod listener;
mod node;
mod port;
mod variant;

pub use component::{
    ComponentDocument, ComponentRecord, ConnectionRecord, COMPONENT_CHILDREN, COMPONENT_INPUTS,
    COMPONENT_OUTPUTS,
};
pub use delta::{GraphDelta, GraphEvent};
pub use graph::{BundleEntry, GraphDocument, GraphModel};
pub use listener::{ListenerId, Listeners};
pub use node::{NodeDocument, NodeRecord, ParameterMap, StateParameterMap};
pub use port::{PlugDirection, Port, PortType};
pub use variant::VariantRecord;
