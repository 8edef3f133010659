//! Run command implementation.

use super::open_manager;
use equisync_core::ExternalReferences;
use std::path::Path;
use tracing::info;

/// Runs the server until Ctrl-C.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let manager = open_manager(path)?;

    let mut external = ExternalReferences::new();
    manager.create_address_space(&mut external)?;
    info!(
        entities = manager.entities().len(),
        external_links = external.values().map(Vec::len).sum::<usize>(),
        "serving"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;

    info!("shutdown requested");
    manager.delete_address_space();

    let stats = manager.stats();
    info!(
        cycles = stats.cycles_completed,
        batches_failed = stats.batches_failed,
        rows_applied = stats.rows_applied,
        "stopped"
    );
    Ok(())
}
