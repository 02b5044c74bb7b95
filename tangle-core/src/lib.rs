//! Tangle Core
//!
//! This crate provides the execution engine of the Tangle visual dataflow
//! environment. Users assemble graphs of typed nodes and port connections in
//! an editor; this crate instantiates those graphs into live nodes,
//! propagates values and signals through them in dependency order, and keeps
//! the running instance in sync with incremental edits.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `model`: the declarative graph (components, node records, ports,
//!   connections, variants) and its transactional edit protocol
//! - `registry`: node type definitions and the registry they live in
//! - `graph`: live node instances, output edges and the update scheduler
//! - `runtime`: the execution context, scopes and component instances
//! - `bundle`: on-demand fetching of components shipped in bundles
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tangle_core::model::{ComponentDocument, ConnectionRecord, GraphDocument, GraphModel, NodeDocument, PortType};
//! use tangle_core::registry::{InputDef, NodeDefinition, NodeRegistry, OutputDef};
//! use tangle_core::{ExecutionContext, Value};
//!
//! let mut registry = NodeRegistry::new();
//! registry.register(
//!     NodeDefinition::new("Double")
//!         .input("value", InputDef::new(PortType::Number).set(|io, v| {
//!             let n = v.as_number().unwrap_or(0.0);
//!             io.internals_mut().set("result", Value::number(n * 2.0));
//!             io.flag_output_dirty("result");
//!             Ok(())
//!         }))
//!         .output("result", OutputDef::new(PortType::Number).get(|i| i.value("result"))),
//! );
//!
//! let app = ComponentDocument::new("App")
//!     .with_node(NodeDocument::new("a", "Double").with_parameter("value", json!(2)))
//!     .with_node(NodeDocument::new("b", "Double"))
//!     .with_connection(ConnectionRecord::new("a", "result", "b", "value"));
//! let graph = GraphModel::import(GraphDocument {
//!     components: vec![app],
//!     ..GraphDocument::default()
//! })
//! .unwrap();
//!
//! let mut ctx = ExecutionContext::with_registry(graph, registry);
//! let scope = ctx.create_root_scope("App").unwrap();
//! ctx.update();
//!
//! let b = ctx.find_node(scope, "b").unwrap();
//! assert_eq!(ctx.output_value(b, "result"), Some(Value::number(8.0)));
//! ```

pub mod bundle;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod value;

pub use bundle::{BundleFetcher, BundleLoader, HttpBundleFetcher};
pub use config::RuntimeConfig;
pub use error::{BundleError, Error, GraphError, Result, RuntimeError};
pub use graph::{NodeIo, NodeKey, ScopeId};
pub use runtime::{ExecutionContext, Propagation, RuntimeEvent};
pub use value::Value;
