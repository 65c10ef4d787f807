//! Configuration module for media-bridge
//!
//! [`BridgeConfig`] controls delivery queue sizing, the full-queue policy
//! applied by the dispatcher, plugin discovery at startup, and logging for
//! the demo binary.
//!
//! # File Location
//!
//! The default configuration file lives in the platform config directory
//! under `media-bridge/config.toml`:
//!
//! - **Linux**: `~/.config/media-bridge/config.toml`
//! - **macOS**: `~/Library/Application Support/media-bridge/config.toml`
//! - **Windows**: `%APPDATA%\media-bridge\config.toml`
//!
//! Files ending in `.json` are read and written as JSON, everything else as
//! TOML.
//!
//! # Example
//!
//! ```ignore
//! use media_bridge::config::{BridgeConfig, OverflowPolicy};
//!
//! let mut config = BridgeConfig::load_or_default("bridge.toml");
//! config.overflow = OverflowPolicy::DropOldest;
//! config.save("bridge.toml")?;
//! ```

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config dir
pub const APP_ID: &str = "media-bridge";

/// Default configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default capacity of a pipeline's bus message queue
pub const DEFAULT_MESSAGE_QUEUE_CAPACITY: usize = 5;

/// Default capacity of an element's outbound buffer queue
pub const DEFAULT_BUFFER_QUEUE_CAPACITY: usize = 10;

/// Default pause between enqueue attempts on a full queue
pub const DEFAULT_FULL_QUEUE_RETRY_MS: u64 = 1;

/// Default log filter used by the binary when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,media_bridge=debug";

/// Get the default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// What the dispatcher does when a delivery queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Stall the native thread until the consumer makes room
    #[default]
    Block,
    /// Evict the oldest queued payload to make room for the new one
    DropOldest,
}

/// Settings for the in-process mock engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSettings {
    /// Interval between buffers produced by test sources
    pub buffer_interval_ms: u64,
    /// Size of each generated buffer in bytes
    pub buffer_size: usize,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            buffer_interval_ms: 2,
            buffer_size: 64,
        }
    }
}

impl MockSettings {
    pub fn buffer_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_interval_ms)
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of each pipeline's bus message queue
    pub message_queue_capacity: usize,

    /// Capacity of each element's outbound buffer queue
    pub buffer_queue_capacity: usize,

    /// Full-queue behavior of the dispatcher
    pub overflow: OverflowPolicy,

    /// Pause between enqueue attempts under [`OverflowPolicy::Block`]
    pub full_queue_retry_ms: u64,

    /// Directories scanned for native plugins at startup
    pub plugin_paths: Vec<PathBuf>,

    /// Plugins that must be present, checked at startup
    pub required_plugins: Vec<String>,

    /// Log filter directive for the binary
    pub log_filter: String,

    /// Optional log file for the binary
    pub log_file: Option<PathBuf>,

    /// Mock engine settings
    pub mock: MockSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            message_queue_capacity: DEFAULT_MESSAGE_QUEUE_CAPACITY,
            buffer_queue_capacity: DEFAULT_BUFFER_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            full_queue_retry_ms: DEFAULT_FULL_QUEUE_RETRY_MS,
            plugin_paths: Vec::new(),
            required_plugins: Vec::new(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_file: None,
            mock: MockSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load a configuration file, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|e| BridgeError::Serialization(format!("Invalid JSON config: {}", e)))?
        } else {
            toml::from_str(&content)
                .map_err(|e| BridgeError::Serialization(format!("Invalid TOML config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| BridgeError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| BridgeError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content)
            .map_err(|e| BridgeError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.message_queue_capacity == 0 {
            return Err(BridgeError::Config(
                "message_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.buffer_queue_capacity == 0 {
            return Err(BridgeError::Config(
                "buffer_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn full_queue_retry(&self) -> Duration {
        Duration::from_millis(self.full_queue_retry_ms)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
