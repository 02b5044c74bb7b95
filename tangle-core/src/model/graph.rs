//! Graph Model
//!
//! The graph model is the editable, declarative description of a whole
//! project: its components, project settings, metadata (including the bundle
//! manifest), variants and root component.
//!
//! # Editing
//!
//! All edits go through [`GraphModel::apply`] or [`GraphModel::apply_batch`].
//! A batch runs against a snapshot and is committed only when every delta
//! succeeds. Events are emitted to listeners after the commit, never for a
//! rolled-back batch.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::component::{ComponentDocument, ComponentRecord};
use super::delta::{GraphDelta, GraphEvent};
use super::listener::{ListenerId, Listeners};
use super::variant::VariantRecord;
use crate::error::GraphError;

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// One entry of the bundle manifest (metadata key `"bundles"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The graph import document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub components: Vec<ComponentDocument>,
    #[serde(default)]
    pub settings: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    #[serde(default)]
    pub variants: Vec<VariantRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_component: Option<String>,
}

/// Declarative description of a project.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    components: IndexMap<String, ComponentRecord>,
    settings: JsonMap,
    metadata: JsonMap,
    variants: Vec<VariantRecord>,
    root_component: Option<String>,
    listeners: Listeners<GraphEvent>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from an import document.
    pub fn import(doc: GraphDocument) -> Result<Self, GraphError> {
        let mut model = Self::new();
        for component in doc.components {
            if model.components.contains_key(&component.name) {
                return Err(GraphError::DuplicateComponent(component.name));
            }
            let record = ComponentRecord::from_document(component)?;
            model.components.insert(record.name.clone(), record);
        }
        for variant in doc.variants {
            if model.variant(&variant.type_name, &variant.name).is_some() {
                return Err(GraphError::DuplicateVariant {
                    type_name: variant.type_name,
                    name: variant.name,
                });
            }
            model.variants.push(variant);
        }
        if let Some(root) = &doc.root_component {
            if !model.components.contains_key(root) {
                return Err(GraphError::ComponentNotFound(root.clone()));
            }
        }
        model.settings = doc.settings;
        model.metadata = doc.metadata;
        model.root_component = doc.root_component;
        Ok(model)
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let doc: GraphDocument =
            serde_json::from_str(json).map_err(|e| GraphError::InvalidDocument(e.to_string()))?;
        Self::import(doc)
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            components: self.components.values().map(ComponentRecord::to_document).collect(),
            settings: self.settings.clone(),
            metadata: self.metadata.clone(),
            variants: self.variants.clone(),
            root_component: self.root_component.clone(),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentRecord> {
        self.components.get(name)
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.components.values()
    }

    pub fn settings(&self) -> &JsonMap {
        &self.settings
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    pub fn variants(&self) -> &[VariantRecord] {
        &self.variants
    }

    pub fn variant(&self, type_name: &str, name: &str) -> Option<&VariantRecord> {
        self.variants.iter().find(|v| v.matches(type_name, name))
    }

    pub fn root_component(&self) -> Option<&str> {
        self.root_component.as_deref()
    }

    /// Bundle manifest from metadata key `"bundles"`; empty when absent or
    /// malformed.
    pub fn bundle_manifest(&self) -> IndexMap<String, BundleEntry> {
        self.metadata
            .get("bundles")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
            .unwrap_or_default()
    }

    /// Name of the bundle that ships `component`, if the manifest lists one.
    pub fn bundle_for_component(&self, component: &str) -> Option<String> {
        self.bundle_manifest()
            .into_iter()
            .find(|(_, entry)| entry.components.iter().any(|c| c == component))
            .map(|(name, _)| name)
    }

    /// Install fetched components that are not yet present.
    ///
    /// Returns the names that were added.
    pub fn install_components(&mut self, docs: Vec<ComponentDocument>) -> Result<Vec<String>, GraphError> {
        let deltas: Vec<GraphDelta> = docs
            .into_iter()
            .filter(|doc| !self.components.contains_key(&doc.name))
            .map(|component| GraphDelta::AddComponent { component })
            .collect();
        let events = self.apply_batch(deltas)?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event {
                GraphEvent::ComponentAdded { component } => Some(component),
                _ => None,
            })
            .collect())
    }

    /// Apply one edit and notify listeners.
    pub fn apply(&mut self, delta: GraphDelta) -> Result<Vec<GraphEvent>, GraphError> {
        self.apply_batch(vec![delta])
    }

    /// Apply a sequence of edits atomically and notify listeners.
    pub fn apply_batch(&mut self, deltas: Vec<GraphDelta>) -> Result<Vec<GraphEvent>, GraphError> {
        let snapshot = self.clone();
        let mut events = Vec::new();
        for delta in deltas {
            if let Err(err) = self.apply_one(delta, &mut events) {
                *self = snapshot;
                return Err(err);
            }
        }
        for event in &events {
            self.listeners.emit(event);
        }
        Ok(events)
    }

    fn component_mut(&mut self, name: &str) -> Result<&mut ComponentRecord, GraphError> {
        self.components
            .get_mut(name)
            .ok_or_else(|| GraphError::ComponentNotFound(name.to_string()))
    }

    fn variant_mut(&mut self, type_name: &str, name: &str) -> Result<&mut VariantRecord, GraphError> {
        self.variants
            .iter_mut()
            .find(|v| v.matches(type_name, name))
            .ok_or_else(|| GraphError::VariantNotFound {
                type_name: type_name.to_string(),
                name: name.to_string(),
            })
    }

    fn apply_one(&mut self, delta: GraphDelta, events: &mut Vec<GraphEvent>) -> Result<(), GraphError> {
        match delta {
            GraphDelta::AddComponent { component } => {
                if self.components.contains_key(&component.name) {
                    return Err(GraphError::DuplicateComponent(component.name));
                }
                let record = ComponentRecord::from_document(component)?;
                events.push(GraphEvent::ComponentAdded {
                    component: record.name.clone(),
                });
                self.components.insert(record.name.clone(), record);
            }
            GraphDelta::RemoveComponent { name } => {
                self.components
                    .shift_remove(&name)
                    .ok_or_else(|| GraphError::ComponentNotFound(name.clone()))?;
                if self.root_component.as_deref() == Some(name.as_str()) {
                    self.root_component = None;
                }
                events.push(GraphEvent::ComponentRemoved { component: name });
            }
            GraphDelta::RenameComponent { old, new } => self.rename_component(old, new, events)?,
            GraphDelta::AddNode {
                component,
                node,
                parent,
                index,
            } => {
                let ids = self
                    .component_mut(&component)?
                    .insert_subtree(&node, parent.as_deref(), index)?;
                events.push(GraphEvent::NodeAdded {
                    component,
                    node: node.id,
                    parent,
                    ids,
                });
            }
            GraphDelta::RemoveNode { component, node } => {
                let (touching, ids) = self.component_mut(&component)?.remove_subtree(&node)?;
                for connection in touching {
                    events.push(GraphEvent::ConnectionRemoved {
                        component: component.clone(),
                        connection,
                    });
                }
                events.push(GraphEvent::NodeRemoved { component, node, ids });
            }
            GraphDelta::AddConnection {
                component,
                connection,
            } => {
                if self.component_mut(&component)?.add_connection(connection.clone())? {
                    events.push(GraphEvent::ConnectionAdded {
                        component,
                        connection,
                    });
                }
            }
            GraphDelta::RemoveConnection {
                component,
                connection,
            } => {
                self.component_mut(&component)?.remove_connection(&connection)?;
                events.push(GraphEvent::ConnectionRemoved {
                    component,
                    connection,
                });
            }
            GraphDelta::SetParameter {
                component,
                node,
                parameter,
                value,
                state,
            } => {
                let record = self.component_mut(&component)?.node_mut(&node)?;
                let target = match &state {
                    Some(state) => record.state_parameters.entry(state.clone()).or_default(),
                    None => &mut record.parameters,
                };
                match &value {
                    Some(value) => {
                        target.insert(parameter.clone(), value.clone());
                    }
                    None => {
                        target.shift_remove(&parameter);
                    }
                }
                events.push(GraphEvent::ParameterChanged {
                    component,
                    node,
                    parameter,
                    value,
                    state,
                });
            }
            GraphDelta::SetNodeVariant {
                component,
                node,
                variant,
            } => {
                self.component_mut(&component)?.node_mut(&node)?.variant = variant.clone();
                events.push(GraphEvent::NodeVariantChanged {
                    component,
                    node,
                    variant,
                });
            }
            GraphDelta::Reparent {
                component,
                node,
                parent,
                index,
            } => {
                let record = self.component_mut(&component)?;
                let old_parent = record.reparent(&node, parent.as_deref(), index)?;
                let siblings = match &parent {
                    Some(parent) => record.node(parent).map(|p| p.children.as_slice()).unwrap_or(&[]),
                    None => record.roots(),
                };
                let index = siblings.iter().position(|id| *id == node).unwrap_or(0);
                events.push(GraphEvent::NodeReparented {
                    component,
                    node,
                    old_parent,
                    new_parent: parent,
                    index,
                });
            }
            GraphDelta::AddPort { component, port } => {
                let name = port.name.clone();
                self.component_mut(&component)?.add_port(port)?;
                events.push(GraphEvent::PortAdded { component, port: name });
            }
            GraphDelta::RemovePort { component, name } => {
                self.component_mut(&component)?.remove_port(&name)?;
                for record in self.components.values_mut() {
                    for connection in record.connections_using_boundary_port(&component, &name) {
                        record.remove_connection(&connection)?;
                        events.push(GraphEvent::ConnectionRemoved {
                            component: record.name.clone(),
                            connection,
                        });
                    }
                }
                events.push(GraphEvent::PortRemoved { component, port: name });
            }
            GraphDelta::RenamePort { component, old, new } => {
                self.component_mut(&component)?.rename_port(&old, &new)?;
                for record in self.components.values_mut() {
                    for (before, after) in record.rename_boundary_port_connections(&component, &old, &new) {
                        events.push(GraphEvent::ConnectionRemoved {
                            component: record.name.clone(),
                            connection: before,
                        });
                        events.push(GraphEvent::ConnectionAdded {
                            component: record.name.clone(),
                            connection: after,
                        });
                    }
                }
                events.push(GraphEvent::PortRenamed { component, old, new });
            }
            GraphDelta::AddVariant { variant } => {
                if self.variant(&variant.type_name, &variant.name).is_some() {
                    return Err(GraphError::DuplicateVariant {
                        type_name: variant.type_name,
                        name: variant.name,
                    });
                }
                events.push(GraphEvent::VariantAdded {
                    type_name: variant.type_name.clone(),
                    name: variant.name.clone(),
                });
                self.variants.push(variant);
            }
            GraphDelta::SetVariantParameter {
                type_name,
                name,
                parameter,
                value,
                state,
            } => {
                self.variant_mut(&type_name, &name)?
                    .set_parameter(&parameter, value.clone(), state.as_deref());
                events.push(GraphEvent::VariantParameterChanged {
                    type_name,
                    name,
                    parameter,
                    value,
                    state,
                });
            }
            GraphDelta::RemoveVariant { type_name, name } => {
                self.variant_mut(&type_name, &name)?;
                self.variants.retain(|v| !v.matches(&type_name, &name));
                events.push(GraphEvent::VariantRemoved { type_name, name });
            }
            GraphDelta::SetSetting { key, value } => {
                set_or_remove(&mut self.settings, &key, value);
                events.push(GraphEvent::SettingChanged { key });
            }
            GraphDelta::SetMetadata { key, value } => {
                set_or_remove(&mut self.metadata, &key, value);
                events.push(GraphEvent::MetadataChanged { key });
            }
            GraphDelta::SetRootComponent { name } => {
                if !self.components.contains_key(&name) {
                    return Err(GraphError::ComponentNotFound(name));
                }
                self.root_component = Some(name.clone());
                events.push(GraphEvent::RootComponentChanged { name });
            }
        }
        Ok(())
    }

    fn rename_component(&mut self, old: String, new: String, events: &mut Vec<GraphEvent>) -> Result<(), GraphError> {
        if self.components.contains_key(&new) {
            return Err(GraphError::DuplicateComponent(new));
        }
        let (index, _, mut record) = self
            .components
            .shift_remove_full(&old)
            .ok_or_else(|| GraphError::ComponentNotFound(old.clone()))?;
        record.name = new.clone();
        self.components.shift_insert(index, new.clone(), record);

        for record in self.components.values_mut() {
            record.rename_instances(&old, &new);
        }
        for variant in &mut self.variants {
            if variant.type_name == old {
                variant.type_name = new.clone();
            }
        }
        if self.root_component.as_deref() == Some(old.as_str()) {
            self.root_component = Some(new.clone());
        }
        events.push(GraphEvent::ComponentRenamed { old, new });
        Ok(())
    }
}

fn set_or_remove(map: &mut JsonMap, key: &str, value: Option<serde_json::Value>) {
    match value {
        Some(value) => {
            map.insert(key.to_string(), value);
        }
        None => {
            map.remove(key);
        }
    }
}
