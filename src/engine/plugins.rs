//! Startup plugin discovery and checks

use crate::engine::MediaEngine;
use crate::error::{BridgeError, Result};
use std::path::Path;

/// Scan `directory` for native plugins and add them to the engine registry
pub fn scan_path_for_plugins(engine: &dyn MediaEngine, directory: &Path) -> bool {
    let changed = engine.scan_path(directory);
    tracing::info!(
        "Scanned {} for plugins ({})",
        directory.display(),
        if changed { "registry updated" } else { "no change" }
    );
    changed
}

/// Fail with [`BridgeError::PluginNotFound`] for the first plugin the engine
/// does not have. An empty list always passes.
pub fn check_plugins<S: AsRef<str>>(engine: &dyn MediaEngine, plugins: &[S]) -> Result<()> {
    for plugin in plugins {
        let name = plugin.as_ref();
        if !engine.has_plugin(name) {
            return Err(BridgeError::PluginNotFound(name.to_string()));
        }
    }
    Ok(())
}
