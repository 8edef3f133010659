//! Snapshot command implementation.

use super::open_manager;
use equisync_core::ExternalReferences;
use std::path::Path;

/// Runs the snapshot command.
pub fn run(path: &Path, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manager = open_manager(path)?;
    manager.create_address_space(&mut ExternalReferences::new())?;
    // Stop the worker first so the printed state comes from a single cycle
    manager.delete_address_space();

    let report = manager.refresh_now();
    if !report.is_success() {
        tracing::warn!("snapshot cycle had failed batches; output may be partial");
    }

    let entities = manager.entities();
    let json = if pretty {
        serde_json::to_string_pretty(&entities)?
    } else {
        serde_json::to_string(&entities)?
    };
    println!("{json}");
    Ok(())
}
