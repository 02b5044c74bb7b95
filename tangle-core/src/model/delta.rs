//! Incremental Edits
//!
//! [`GraphDelta`] is an edit requested by an editor; [`GraphEvent`] is what
//! the model reports after an edit has been committed. One delta can produce
//! several events (removing a node also removes its connections).

use serde::{Deserialize, Serialize};

use super::component::{ComponentDocument, ConnectionRecord};
use super::node::NodeDocument;
use super::port::Port;
use super::variant::VariantRecord;

/// An edit to the graph model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GraphDelta {
    AddComponent {
        component: ComponentDocument,
    },
    RemoveComponent {
        name: String,
    },
    RenameComponent {
        old: String,
        new: String,
    },
    AddNode {
        component: String,
        node: NodeDocument,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    RemoveNode {
        component: String,
        node: String,
    },
    AddConnection {
        component: String,
        connection: ConnectionRecord,
    },
    RemoveConnection {
        component: String,
        connection: ConnectionRecord,
    },
    /// `value: None` deletes the parameter.
    SetParameter {
        component: String,
        node: String,
        parameter: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
        #[serde(default)]
        state: Option<String>,
    },
    SetNodeVariant {
        component: String,
        node: String,
        #[serde(default)]
        variant: Option<String>,
    },
    Reparent {
        component: String,
        node: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    AddPort {
        component: String,
        port: Port,
    },
    RemovePort {
        component: String,
        name: String,
    },
    RenamePort {
        component: String,
        old: String,
        new: String,
    },
    AddVariant {
        variant: VariantRecord,
    },
    SetVariantParameter {
        type_name: String,
        name: String,
        parameter: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
        #[serde(default)]
        state: Option<String>,
    },
    RemoveVariant {
        type_name: String,
        name: String,
    },
    SetSetting {
        key: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
    SetMetadata {
        key: String,
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
    SetRootComponent {
        name: String,
    },
}

/// A committed change, reported to listeners and mirrored by scopes.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    ComponentAdded {
        component: String,
    },
    ComponentRemoved {
        component: String,
    },
    ComponentRenamed {
        old: String,
        new: String,
    },
    /// A subtree was inserted; `ids` lists it parents first.
    NodeAdded {
        component: String,
        node: String,
        parent: Option<String>,
        ids: Vec<String>,
    },
    /// A subtree was removed; `ids` lists it children first.
    NodeRemoved {
        component: String,
        node: String,
        ids: Vec<String>,
    },
    ConnectionAdded {
        component: String,
        connection: ConnectionRecord,
    },
    ConnectionRemoved {
        component: String,
        connection: ConnectionRecord,
    },
    ParameterChanged {
        component: String,
        node: String,
        parameter: String,
        value: Option<serde_json::Value>,
        state: Option<String>,
    },
    NodeVariantChanged {
        component: String,
        node: String,
        variant: Option<String>,
    },
    NodeReparented {
        component: String,
        node: String,
        old_parent: Option<String>,
        new_parent: Option<String>,
        index: usize,
    },
    PortAdded {
        component: String,
        port: String,
    },
    PortRemoved {
        component: String,
        port: String,
    },
    PortRenamed {
        component: String,
        old: String,
        new: String,
    },
    VariantAdded {
        type_name: String,
        name: String,
    },
    /// A variant parameter was set (`value: Some`) or deleted (`None`).
    VariantParameterChanged {
        type_name: String,
        name: String,
        parameter: String,
        value: Option<serde_json::Value>,
        state: Option<String>,
    },
    VariantRemoved {
        type_name: String,
        name: String,
    },
    SettingChanged {
        key: String,
    },
    MetadataChanged {
        key: String,
    },
    RootComponentChanged {
        name: String,
    },
}
