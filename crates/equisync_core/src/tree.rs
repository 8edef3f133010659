//! The hosted tree: node identities, the predefined-node registry and
//! property values.
//!
//! This is the part of the address space the equipment manager owns. The
//! host server links it into the wider address space through the
//! [`ExternalReferences`] filled in at initialization.

use crate::error::{CoreError, CoreResult};
use crate::schema::{AttributeKey, AttributeType, AttributeValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    /// Numeric identifier (`i=`).
    Numeric(u32),
    /// String identifier (`s=`).
    String(String),
}

/// A namespace-qualified node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index.
    pub namespace: u16,
    /// Identifier within the namespace.
    pub identifier: Identifier,
}

/// The standard Objects folder every server exposes.
pub const OBJECTS_FOLDER: NodeId = NodeId {
    namespace: 0,
    identifier: Identifier::Numeric(85),
};

impl NodeId {
    /// Creates a numeric node id.
    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace, v),
            Identifier::String(v) => write!(f, "ns={};s={}", self.namespace, v),
        }
    }
}

/// Error returned when a node id string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed node id: {0}")]
pub struct ParseNodeIdError(String);

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    /// Parses `ns=<n>;i=<u32>`, `ns=<n>;s=<text>`, or the same without the
    /// namespace prefix (namespace 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseNodeIdError(s.to_string());

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail.split_once(';').ok_or_else(malformed)?;
                (ns.parse::<u16>().map_err(|_| malformed())?, rest)
            }
            None => (0, s),
        };

        if let Some(value) = rest.strip_prefix("i=") {
            let value = value.parse::<u32>().map_err(|_| malformed())?;
            Ok(NodeId::numeric(namespace, value))
        } else if let Some(value) = rest.strip_prefix("s=") {
            Ok(NodeId::string(namespace, value))
        } else {
            Err(malformed())
        }
    }
}

/// The class of a hosted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClass {
    /// A folder organizing other nodes.
    Folder,
    /// An equipment object.
    Object,
    /// A scalar property of an object.
    Property,
}

/// Reference kinds used by this manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceType {
    /// Folder/object organization.
    Organizes,
    /// Object to property.
    HasProperty,
}

/// A directed reference from some node to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Kind of reference.
    pub reference_type: ReferenceType,
    /// True if this is the inverse direction (child to parent).
    pub is_inverse: bool,
    /// Target node.
    pub target: NodeId,
}

impl Reference {
    /// Creates a forward reference.
    pub fn forward(reference_type: ReferenceType, target: NodeId) -> Self {
        Self {
            reference_type,
            is_inverse: false,
            target,
        }
    }

    /// Creates an inverse reference.
    pub fn inverse(reference_type: ReferenceType, target: NodeId) -> Self {
        Self {
            reference_type,
            is_inverse: true,
            target,
        }
    }
}

/// References the manager asks the host to add to nodes it does not own,
/// keyed by the foreign node id.
pub type ExternalReferences = HashMap<NodeId, Vec<Reference>>;

/// Binds a property node to the entity attribute it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySource {
    /// Owning entity.
    pub entity_id: u32,
    /// Attribute key.
    pub key: AttributeKey,
}

/// Immutable description of a node in the registry.
///
/// Values live beside the registry, not in the node, so handles holding a
/// node never see a value that bypassed the shared lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedNode {
    /// Node identity.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Node class.
    pub class: NodeClass,
    /// Parent node, if any.
    pub parent: Option<NodeId>,
    /// Value type, for properties.
    pub data_type: Option<AttributeType>,
    /// Read binding, for properties.
    pub source: Option<PropertySource>,
}

/// A value together with the time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    /// The value.
    pub value: AttributeValue,
    /// When the value was pushed into the tree.
    pub source_timestamp: DateTime<Utc>,
}

/// Observer notified when a property's change mask is cleared.
///
/// Listeners run inside the shared lock and must not call back into the
/// node manager. A panicking listener is logged and skipped.
pub trait ChangeListener: Send + Sync {
    /// Called once per changed property push.
    fn on_change(&self, node: &HostedNode, value: &DataValue);
}

struct PropertySlot {
    data: DataValue,
    changed: bool,
}

/// The predefined-node registry for one namespace.
pub struct AddressSpace {
    namespace_index: u16,
    nodes: HashMap<NodeId, Arc<HostedNode>>,
    references: HashMap<NodeId, Vec<Reference>>,
    values: HashMap<NodeId, PropertySlot>,
    listeners: Vec<Arc<dyn ChangeListener>>,
}

impl AddressSpace {
    /// Creates an empty registry for `namespace_index`.
    pub fn new(namespace_index: u16) -> Self {
        Self {
            namespace_index,
            nodes: HashMap::new(),
            references: HashMap::new(),
            values: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Returns true if `node_id` belongs to the owned namespace.
    pub fn is_in_namespace(&self, node_id: &NodeId) -> bool {
        node_id.namespace == self.namespace_index
    }

    /// Registers a node.
    ///
    /// # Errors
    ///
    /// Fails if the node is outside the namespace or already registered.
    pub fn add_predefined_node(&mut self, node: HostedNode) -> CoreResult<Arc<HostedNode>> {
        if !self.is_in_namespace(&node.node_id) {
            return Err(CoreError::ForeignNamespace(node.node_id));
        }
        if self.nodes.contains_key(&node.node_id) {
            return Err(CoreError::DuplicateNode(node.node_id));
        }
        let node = Arc::new(node);
        self.nodes.insert(node.node_id.clone(), Arc::clone(&node));
        Ok(node)
    }

    /// Adds a reference originating at `source`.
    pub fn add_reference(&mut self, source: &NodeId, reference: Reference) {
        self.references
            .entry(source.clone())
            .or_default()
            .push(reference);
    }

    /// Returns the references originating at `node_id`.
    pub fn references(&self, node_id: &NodeId) -> &[Reference] {
        self.references
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the forward hierarchical children of `node_id`.
    pub fn children(&self, node_id: &NodeId) -> Vec<&Arc<HostedNode>> {
        self.references(node_id)
            .iter()
            .filter(|r| !r.is_inverse)
            .filter_map(|r| self.nodes.get(&r.target))
            .collect()
    }

    /// Finds a child of `parent` by browse name.
    pub fn find_child(&self, parent: &NodeId, browse_name: &str) -> Option<&Arc<HostedNode>> {
        self.children(parent)
            .into_iter()
            .find(|node| node.browse_name == browse_name)
    }

    /// Looks up a registered node.
    pub fn get(&self, node_id: &NodeId) -> Option<&Arc<HostedNode>> {
        self.nodes.get(node_id)
    }

    /// Returns true if `node_id` is registered.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Returns the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sets a property value and marks it changed.
    ///
    /// # Errors
    ///
    /// Fails if the node is not a registered property or the value has the
    /// wrong type.
    pub fn set_value(
        &mut self,
        node_id: &NodeId,
        value: AttributeValue,
        timestamp: DateTime<Utc>,
    ) -> CoreResult<()> {
        let node = self
            .nodes
            .get(node_id)
            .filter(|n| n.class == NodeClass::Property)
            .ok_or_else(|| CoreError::NodeNotFound(node_id.clone()))?;

        if let Some(expected) = node.data_type {
            let found = value.attribute_type();
            if found != expected {
                return Err(CoreError::TypeMismatch {
                    key: node.browse_name.clone(),
                    expected,
                    found,
                });
            }
        }

        self.values.insert(
            node_id.clone(),
            PropertySlot {
                data: DataValue {
                    value,
                    source_timestamp: timestamp,
                },
                changed: true,
            },
        );
        Ok(())
    }

    /// Returns the current value of a property.
    pub fn value(&self, node_id: &NodeId) -> Option<&DataValue> {
        self.values.get(node_id).map(|slot| &slot.data)
    }

    /// Returns true if a property has a change not yet published.
    pub fn is_changed(&self, node_id: &NodeId) -> bool {
        self.values.get(node_id).is_some_and(|slot| slot.changed)
    }

    /// Publishes a pending change to every listener and clears the mask.
    pub fn clear_change_masks(&mut self, node_id: &NodeId) {
        let Some(slot) = self.values.get_mut(node_id) else {
            return;
        };
        if !slot.changed {
            return;
        }
        slot.changed = false;

        if let Some(node) = self.nodes.get(node_id) {
            for listener in &self.listeners {
                let notify = AssertUnwindSafe(|| listener.on_change(node, &slot.data));
                if panic::catch_unwind(notify).is_err() {
                    warn!(node = %node.node_id, "change listener panicked");
                }
            }
        }
    }

    /// Registers a change listener.
    pub fn subscribe(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listeners.push(listener);
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("namespace_index", &self.namespace_index)
            .field("nodes", &self.nodes.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn property(ns: u16, id: &str, ty: AttributeType) -> HostedNode {
        HostedNode {
            node_id: NodeId::string(ns, id),
            browse_name: id.to_string(),
            display_name: id.to_string(),
            class: NodeClass::Property,
            parent: None,
            data_type: Some(ty),
            source: None,
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(NodeId, AttributeValue)>>);

    impl ChangeListener for Recorder {
        fn on_change(&self, node: &HostedNode, value: &DataValue) {
            self.0.lock().push((node.node_id.clone(), value.value.clone()));
        }
    }

    #[test]
    fn node_id_display_and_parse() {
        let numeric = NodeId::numeric(2, 7);
        assert_eq!(numeric.to_string(), "ns=2;i=7");
        assert_eq!("ns=2;i=7".parse::<NodeId>().unwrap(), numeric);

        let string = NodeId::string(2, "7-Value");
        assert_eq!(string.to_string(), "ns=2;s=7-Value");
        assert_eq!("ns=2;s=7-Value".parse::<NodeId>().unwrap(), string);

        assert_eq!("i=85".parse::<NodeId>().unwrap(), OBJECTS_FOLDER);
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2;g=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn duplicate_and_foreign_nodes_are_rejected() {
        let mut space = AddressSpace::new(2);
        space
            .add_predefined_node(property(2, "a", AttributeType::Double))
            .unwrap();

        assert!(matches!(
            space.add_predefined_node(property(2, "a", AttributeType::Double)),
            Err(CoreError::DuplicateNode(_))
        ));
        assert!(space
            .add_predefined_node(property(3, "b", AttributeType::Double))
            .is_err());
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn set_value_checks_type() {
        let mut space = AddressSpace::new(2);
        space
            .add_predefined_node(property(2, "a", AttributeType::Double))
            .unwrap();
        let id = NodeId::string(2, "a");

        assert!(space
            .set_value(&id, AttributeValue::Int32(1), Utc::now())
            .is_err());
        space
            .set_value(&id, AttributeValue::Double(1.5), Utc::now())
            .unwrap();
        assert_eq!(space.value(&id).unwrap().value, AttributeValue::Double(1.5));
    }

    #[test]
    fn clearing_change_mask_notifies_once() {
        let mut space = AddressSpace::new(2);
        let recorder = Arc::new(Recorder::default());
        space.subscribe(recorder.clone());
        space
            .add_predefined_node(property(2, "a", AttributeType::Double))
            .unwrap();
        let id = NodeId::string(2, "a");

        space
            .set_value(&id, AttributeValue::Double(2.0), Utc::now())
            .unwrap();
        assert!(space.is_changed(&id));

        space.clear_change_masks(&id);
        space.clear_change_masks(&id);
        assert!(!space.is_changed(&id));
        assert_eq!(recorder.0.lock().len(), 1);
    }

    struct Panicker;

    impl ChangeListener for Panicker {
        fn on_change(&self, _node: &HostedNode, _value: &DataValue) {
            panic!("listener failure");
        }
    }

    #[test]
    fn panicking_listener_does_not_stop_notification() {
        let mut space = AddressSpace::new(2);
        let recorder = Arc::new(Recorder::default());
        space.subscribe(Arc::new(Panicker));
        space.subscribe(recorder.clone());
        space
            .add_predefined_node(property(2, "a", AttributeType::Double))
            .unwrap();
        let id = NodeId::string(2, "a");

        space
            .set_value(&id, AttributeValue::Double(2.0), Utc::now())
            .unwrap();
        space.clear_change_masks(&id);

        assert!(!space.is_changed(&id));
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn children_follow_forward_references() {
        let mut space = AddressSpace::new(2);
        let parent = NodeId::string(2, "root");
        space
            .add_predefined_node(property(2, "a", AttributeType::Double))
            .unwrap();
        space.add_reference(
            &parent,
            Reference::forward(ReferenceType::Organizes, NodeId::string(2, "a")),
        );
        space.add_reference(
            &parent,
            Reference::inverse(ReferenceType::Organizes, OBJECTS_FOLDER),
        );

        let children = space.children(&parent);
        assert_eq!(children.len(), 1);
        assert!(space.find_child(&parent, "a").is_some());
        assert!(space.find_child(&parent, "b").is_none());
    }
}
