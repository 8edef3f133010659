//! Check-config command implementation.

use equisync_core::ServerConfig;
use std::path::Path;

/// Runs the check-config command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load(path)?;
    println!("{}: ok", path.display());
    println!("  poll interval:   {}s", config.poll_interval.as_secs());
    println!("  record limit:    {}", config.record_limit);
    println!("  abnormity limit: {}", config.abnormity_limit);
    println!(
        "  namespace:       {} (ns={})",
        config.namespace_uri, config.namespace_index
    );
    println!("  root folder:     {}", config.root_folder);
    Ok(())
}
