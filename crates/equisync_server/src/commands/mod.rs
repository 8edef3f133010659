//! CLI command implementations.

pub mod check_config;
pub mod run;
pub mod snapshot;

use equisync_core::{EquipmentNodeManager, ServerConfig};
use equisync_store::PgStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Loads `path` and builds a manager connected to the configured store.
pub fn open_manager(path: &Path) -> Result<EquipmentNodeManager, Box<dyn std::error::Error>> {
    let config = ServerConfig::load(path)?;
    info!(
        config = %path.display(),
        poll_interval_secs = config.poll_interval.as_secs(),
        namespace = %config.namespace_uri,
        "configuration loaded"
    );

    let store = PgStore::connect(&config.connection_string)?;
    Ok(EquipmentNodeManager::new(config, Arc::new(store))?)
}
