//! Error types.
//!
//! Each layer has its own error enum. [`Error`] collects them for callers
//! that drive the whole engine.

use thiserror::Error;

/// Errors raised while editing the declarative graph model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("component '{0}' already exists")]
    DuplicateComponent(String),

    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    #[error("node '{node}' already exists in component '{component}'")]
    DuplicateNode { component: String, node: String },

    #[error("node '{node}' not found in component '{component}'")]
    NodeNotFound { component: String, node: String },

    #[error("connection endpoint '{node}' missing in component '{component}'")]
    MissingEndpoint { component: String, node: String },

    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    #[error("cannot move node '{node}' under its own descendant '{parent}'")]
    InvalidReparent { node: String, parent: String },

    #[error("port '{0}' already exists")]
    DuplicatePort(String),

    #[error("port '{0}' not found")]
    PortNotFound(String),

    #[error("variant '{name}' for type '{type_name}' already exists")]
    DuplicateVariant { type_name: String, name: String },

    #[error("variant '{name}' for type '{type_name}' not found")]
    VariantNotFound { type_name: String, name: String },

    #[error("invalid graph document: {0}")]
    InvalidDocument(String),
}

/// Errors raised while instantiating or driving live nodes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("unknown node type '{0}'")]
    UnknownType(String),

    #[error("node '{node}' has no input '{port}'")]
    UnknownInput { node: String, port: String },

    #[error("node '{node}' has no output '{port}'")]
    UnknownOutput { node: String, port: String },

    #[error("connection endpoint '{0}' is not instantiated")]
    MissingEndpoint(String),

    #[error("scope {0} not found")]
    ScopeNotFound(u64),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("node '{node}' has no method '{method}'")]
    MethodNotFound { node: String, method: String },

    #[error("update of node {node} failed: {message}")]
    UpdateFailed { node: String, message: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors raised while fetching component bundles.
///
/// `Clone` so a single fetch result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BundleError {
    #[error("bundle '{0}' not found")]
    NotFound(String),

    #[error("no bundle provides component '{0}'")]
    UnknownComponent(String),

    #[error("failed to fetch bundle '{bundle}': {message}")]
    Transport { bundle: String, message: String },

    #[error("bundle '{bundle}' is malformed: {message}")]
    Decode { bundle: String, message: String },
}

/// Top-level error for engine callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
