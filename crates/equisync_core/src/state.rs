//! The shared state guarded by the manager's single lock.

use crate::entity::EntityTable;
use crate::projector::TreeProjector;
use crate::tree::AddressSpace;
use parking_lot::Mutex;
use std::sync::Arc;

/// Entity table and hosted tree, always locked together.
///
/// One exclusive lock covers entity creation, attribute merge with the
/// matching property push, and lookup reads. No reader/writer split: a
/// reader holding the lock sees either all of a batch or none of it.
#[derive(Debug)]
pub struct EngineState {
    /// Latest known entity state.
    pub table: EntityTable,
    /// The hosted node registry.
    pub space: AddressSpace,
    /// Node factory for new entities.
    pub projector: TreeProjector,
}

impl EngineState {
    /// Creates empty state for `namespace` with root folder `root_folder`.
    pub fn new(namespace: u16, root_folder: impl Into<String>) -> Self {
        Self {
            table: EntityTable::new(),
            space: AddressSpace::new(namespace),
            projector: TreeProjector::new(namespace, root_folder),
        }
    }
}

/// Handle to the shared state, injected into the refresh loop and gateway.
pub type SharedState = Arc<Mutex<EngineState>>;

/// Wraps `state` for sharing.
pub fn shared(state: EngineState) -> SharedState {
    Arc::new(Mutex::new(state))
}
