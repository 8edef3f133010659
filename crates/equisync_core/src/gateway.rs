//! Resolution of client node ids into validated handles.

use crate::error::{LookupError, LookupResult};
use crate::state::SharedState;
use crate::tree::{DataValue, HostedNode, NodeId};
use std::sync::Arc;

/// A reference to a hosted node, usable for reads.
///
/// Validation is monotonic: once a handle is marked validated it is never
/// re-checked. Nodes are never removed, so this cannot go stale.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    /// The resolved node id.
    pub node_id: NodeId,
    /// The node the id resolved to.
    pub node: Arc<HostedNode>,
    /// True once the node was confirmed present in the registry.
    pub validated: bool,
}

impl NodeHandle {
    /// Creates a handle that has not been checked against the registry.
    pub fn unvalidated(node: Arc<HostedNode>) -> Self {
        Self {
            node_id: node.node_id.clone(),
            node,
            validated: false,
        }
    }
}

/// Lookup front end over the shared state.
#[derive(Debug, Clone)]
pub struct Gateway {
    namespace_index: u16,
    state: SharedState,
}

impl Gateway {
    /// Creates a gateway for nodes in `namespace_index`.
    pub fn new(namespace_index: u16, state: SharedState) -> Self {
        Self {
            namespace_index,
            state,
        }
    }

    /// Resolves `node_id` to a validated handle.
    ///
    /// Ids outside the owned namespace are rejected without taking the lock.
    pub fn resolve(&self, node_id: &NodeId) -> LookupResult<NodeHandle> {
        if node_id.namespace != self.namespace_index {
            return Err(LookupError::NotFound(node_id.clone()));
        }

        let state = self.state.lock();
        let node = state
            .space
            .get(node_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(node_id.clone()))?;

        Ok(NodeHandle {
            node_id: node_id.clone(),
            node,
            validated: true,
        })
    }

    /// Returns the node behind `handle`.
    ///
    /// An unvalidated handle must point at the very node registered under
    /// its id.
    pub fn validate(&self, handle: &NodeHandle) -> LookupResult<Arc<HostedNode>> {
        if handle.validated {
            return Ok(Arc::clone(&handle.node));
        }
        if handle.node_id.namespace != self.namespace_index {
            return Err(LookupError::Invalid);
        }

        let state = self.state.lock();
        match state.space.get(&handle.node_id) {
            Some(registered) if Arc::ptr_eq(registered, &handle.node) => Ok(Arc::clone(registered)),
            _ => Err(LookupError::Invalid),
        }
    }

    /// Reads the current value of a property from the entity table.
    pub fn read_value(&self, handle: &NodeHandle) -> LookupResult<DataValue> {
        let node = self.validate(handle)?;
        let source = node
            .source
            .ok_or_else(|| LookupError::NotReadable(handle.node_id.clone()))?;

        let state = self.state.lock();
        let value = state
            .table
            .lookup(source.entity_id)
            .and_then(|entity| entity.get(source.key))
            .cloned()
            .ok_or_else(|| LookupError::NotReadable(handle.node_id.clone()))?;
        let source_timestamp = state
            .space
            .value(&handle.node_id)
            .map(|data| data.source_timestamp)
            .unwrap_or_else(crate::schema::default_timestamp);

        Ok(DataValue {
            value,
            source_timestamp,
        })
    }
}
