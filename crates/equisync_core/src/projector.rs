//! Projection of entities into the hosted tree.
//!
//! Each entity becomes an object node organized under the root folder, with
//! one property child per schema key. Node ids are derived from the entity's
//! primary key, so they are stable for as long as the backing ids are.

use crate::error::{CoreError, CoreResult};
use crate::schema::{AttributeKey, AttributeValue};
use crate::tree::{
    AddressSpace, ExternalReferences, HostedNode, Identifier, NodeClass, NodeId, PropertySource, Reference,
    ReferenceType, OBJECTS_FOLDER,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Returns the id of the object node for entity `id`.
pub fn object_node_id(namespace: u16, id: u32) -> NodeId {
    NodeId::numeric(namespace, id)
}

/// Returns the id of the `key` property of entity `id`.
pub fn property_node_id(namespace: u16, id: u32, key: AttributeKey) -> NodeId {
    NodeId::string(namespace, format!("{id}-{}", key.as_str()))
}

/// Creates nodes and properties in an [`AddressSpace`].
///
/// The projector does not deduplicate. Callers create each entity's node
/// exactly once, under the shared lock.
#[derive(Debug, Clone)]
pub struct TreeProjector {
    namespace: u16,
    root: NodeId,
    root_name: String,
}

impl TreeProjector {
    /// Creates a projector for `namespace` whose root folder is `root_name`.
    pub fn new(namespace: u16, root_name: impl Into<String>) -> Self {
        let root_name = root_name.into();
        Self {
            namespace,
            root: NodeId::string(namespace, root_name.clone()),
            root_name,
        }
    }

    /// Returns the root folder id.
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// Registers the root folder, organized under the Objects folder.
    pub fn add_root_folder(&self, space: &mut AddressSpace) -> CoreResult<Arc<HostedNode>> {
        let folder = space.add_predefined_node(HostedNode {
            node_id: self.root.clone(),
            browse_name: self.root_name.clone(),
            display_name: self.root_name.clone(),
            class: NodeClass::Folder,
            parent: Some(OBJECTS_FOLDER),
            data_type: None,
            source: None,
        })?;

        space.add_reference(
            &self.root,
            Reference::inverse(ReferenceType::Organizes, OBJECTS_FOLDER),
        );
        Ok(folder)
    }

    /// Asks the host to add the Objects folder → root folder link.
    pub fn link_root(&self, external: &mut ExternalReferences) {
        external
            .entry(OBJECTS_FOLDER)
            .or_default()
            .push(Reference::forward(ReferenceType::Organizes, self.root.clone()));
    }

    /// Creates the object node for entity `id`, organized under the root.
    pub fn create_node(&self, space: &mut AddressSpace, id: u32, name: &str) -> CoreResult<NodeId> {
        if !space.contains(&self.root) {
            return Err(CoreError::NodeNotFound(self.root.clone()));
        }

        let node_id = object_node_id(self.namespace, id);
        space.add_predefined_node(HostedNode {
            node_id: node_id.clone(),
            browse_name: name.to_string(),
            display_name: name.to_string(),
            class: NodeClass::Object,
            parent: Some(self.root.clone()),
            data_type: None,
            source: None,
        })?;

        space.add_reference(
            &node_id,
            Reference::inverse(ReferenceType::Organizes, self.root.clone()),
        );
        space.add_reference(
            &self.root,
            Reference::forward(ReferenceType::Organizes, node_id.clone()),
        );
        Ok(node_id)
    }

    /// Creates the `key` property under `node` and sets its initial value.
    ///
    /// The property is bound to `(entity id, key)` so reads can be served
    /// from the entity table.
    pub fn create_property(
        &self,
        space: &mut AddressSpace,
        node: &NodeId,
        key: AttributeKey,
        initial: AttributeValue,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<NodeId> {
        let parent = space
            .get(node)
            .filter(|n| n.class == NodeClass::Object)
            .cloned()
            .ok_or_else(|| CoreError::NodeNotFound(node.clone()))?;
        let Identifier::Numeric(entity_id) = parent.node_id.identifier.clone() else {
            return Err(CoreError::NodeNotFound(node.clone()));
        };

        let expected = key.attribute_type();
        if initial.attribute_type() != expected {
            return Err(CoreError::TypeMismatch {
                key: key.as_str().to_string(),
                expected,
                found: initial.attribute_type(),
            });
        }

        let property_id = property_node_id(self.namespace, entity_id, key);
        space.add_predefined_node(HostedNode {
            node_id: property_id.clone(),
            browse_name: key.as_str().to_string(),
            display_name: format!("{}-{}", parent.browse_name, key.as_str()),
            class: NodeClass::Property,
            parent: Some(node.clone()),
            data_type: Some(expected),
            source: Some(PropertySource { entity_id, key }),
        })?;

        space.add_reference(
            node,
            Reference::forward(ReferenceType::HasProperty, property_id.clone()),
        );
        space.add_reference(
            &property_id,
            Reference::inverse(ReferenceType::HasProperty, node.clone()),
        );
        space.set_value(&property_id, initial, timestamp)?;
        space.clear_change_masks(&property_id);
        Ok(property_id)
    }
}
