//! The equipment node manager: lifecycle glue between the host, the store
//! and the refresh loop.
//!
//! The host calls [`EquipmentNodeManager::create_address_space`] once at
//! startup and [`EquipmentNodeManager::delete_address_space`] once at
//! shutdown. In between, any number of threads may resolve, validate and
//! read nodes while the refresh worker merges new rows.

use crate::config::ServerConfig;
use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult, LookupResult};
use crate::gateway::{Gateway, NodeHandle};
use crate::refresh::{BatchKind, CycleReport, RefreshState, RefreshStats, Refresher, RefreshWorker};
use crate::state::{shared, EngineState, SharedState};
use crate::tree::{ChangeListener, DataValue, ExternalReferences, HostedNode, NodeId};
use equisync_store::RecordStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Hosts the equipment tree for one namespace.
pub struct EquipmentNodeManager {
    config: ServerConfig,
    state: SharedState,
    refresher: Arc<Refresher>,
    gateway: Gateway,
    worker: Mutex<Option<RefreshWorker>>,
    lifecycle: Mutex<Lifecycle>,
}

impl EquipmentNodeManager {
    /// Creates a manager reading from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if `config` does not validate.
    pub fn new(config: ServerConfig, store: Arc<dyn RecordStore>) -> CoreResult<Self> {
        config.validate()?;

        let state = shared(EngineState::new(config.namespace_index, config.root_folder.clone()));
        let refresher = Arc::new(Refresher::new(
            store,
            Arc::clone(&state),
            config.record_limit,
            config.abnormity_limit,
        ));
        let gateway = Gateway::new(config.namespace_index, Arc::clone(&state));

        Ok(Self {
            config,
            state,
            refresher,
            gateway,
            worker: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Builds the tree and starts the refresh worker.
    ///
    /// References from foreign nodes into this namespace (the Objects folder
    /// organizing the root folder) are added to `external` once the tree is
    /// built.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::AlreadyInitialized`] once the address space
    /// exists and with [`CoreError::Initialization`] if the initial equipment
    /// batch fails. After an initialization failure `external` is untouched
    /// and the call may be retried.
    pub fn create_address_space(&self, external: &mut ExternalReferences) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Created {
            return Err(CoreError::AlreadyInitialized);
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            // Left in place by an earlier failed attempt
            if !state.space.contains(state.projector.root()) {
                state.projector.add_root_folder(&mut state.space)?;
            }
        }

        let report = self.refresher.run_batch(BatchKind::Equipment).map_err(|e| {
            error!(error = %e, "initial equipment batch failed");
            CoreError::Initialization(e.to_string())
        })?;

        let worker = RefreshWorker::spawn(Arc::clone(&self.refresher), self.config.poll_interval)?;
        *self.worker.lock() = Some(worker);
        self.state.lock().projector.link_root(external);
        *lifecycle = Lifecycle::Running;

        info!(
            namespace = %self.config.namespace_uri,
            entities = report.created,
            "address space created"
        );
        Ok(())
    }

    /// Stops the refresh worker and waits for it to exit.
    ///
    /// Safe to call more than once.
    pub fn delete_address_space(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(mut worker) = self.worker.lock().take() {
            worker.shutdown();
            info!("address space deleted");
        }
        *lifecycle = Lifecycle::Stopped;
    }

    /// Returns true while the refresh worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(RefreshWorker::is_running)
    }

    /// Resolves a client node id to a validated handle.
    pub fn resolve_node_id(&self, node_id: &NodeId) -> LookupResult<NodeHandle> {
        self.gateway.resolve(node_id)
    }

    /// Validates a handle and returns its node.
    pub fn validate_handle(&self, handle: &NodeHandle) -> LookupResult<Arc<HostedNode>> {
        self.gateway.validate(handle)
    }

    /// Reads the current value behind a property handle.
    pub fn read_value(&self, handle: &NodeHandle) -> LookupResult<DataValue> {
        self.gateway.read_value(handle)
    }

    /// Returns a copy of entity `id`.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.state.lock().table.lookup(id).cloned()
    }

    /// Returns a copy of every entity, ordered by id.
    pub fn entities(&self) -> Vec<Entity> {
        self.state.lock().table.snapshot()
    }

    /// Runs one refresh cycle on the calling thread.
    pub fn refresh_now(&self) -> CycleReport {
        self.refresher.run_cycle()
    }

    /// Gets refresh statistics.
    pub fn stats(&self) -> RefreshStats {
        self.refresher.stats()
    }

    /// Gets the refresh worker state.
    pub fn refresh_state(&self) -> RefreshState {
        self.refresher.state()
    }

    /// Registers a listener for property value changes.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.state.lock().space.subscribe(listener);
    }
}

impl Drop for EquipmentNodeManager {
    fn drop(&mut self) {
        self.delete_address_space();
    }
}
