//! Test data builders for bridges and configurations

use media_bridge::config::MockSettings;
use media_bridge::{BridgeConfig, OverflowPolicy};

/// Builder for bridge configurations with fast mock timing
pub struct ConfigBuilder {
    config: BridgeConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BridgeConfig {
                mock: MockSettings {
                    buffer_interval_ms: 1,
                    buffer_size: 32,
                },
                ..BridgeConfig::default()
            },
        }
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_queue_capacity = capacity;
        self
    }

    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.config.message_queue_capacity = capacity;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow = policy;
        self
    }

    pub fn buffer_interval_ms(mut self, interval: u64) -> Self {
        self.config.mock.buffer_interval_ms = interval;
        self
    }

    pub fn require_plugin(mut self, plugin: &str) -> Self {
        self.config.required_plugins.push(plugin.to_string());
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }

    /// Bridge over the mock engine
    #[cfg(feature = "mock-engine")]
    pub fn bridge(self) -> media_bridge::MediaBridge {
        media_bridge::MediaBridge::with_mock_engine(self.config).expect("mock bridge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .buffer_capacity(3)
            .overflow(OverflowPolicy::DropOldest)
            .build();

        assert_eq!(config.buffer_queue_capacity, 3);
        assert_eq!(config.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.mock.buffer_interval_ms, 1);
    }
}
