//! Integration tests for configuration files at their default location

use media_bridge::config::{default_config_path, APP_ID, CONFIG_FILE};
use media_bridge::{BridgeConfig, OverflowPolicy};
use serial_test::serial;

/// Point the platform config dir at a temporary directory
fn with_config_home<F: FnOnce()>(f: F) {
    let dir = tempfile::tempdir().unwrap();
    let previous = std::env::var_os("XDG_CONFIG_HOME");
    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    f();
    match previous {
        Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
}

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn test_default_path_follows_config_home() {
    with_config_home(|| {
        let home = std::env::var_os("XDG_CONFIG_HOME").unwrap();
        let path = default_config_path().unwrap();
        assert!(path.starts_with(&home));
        assert!(path.ends_with(format!("{}/{}", APP_ID, CONFIG_FILE)));
    });
}

#[test]
#[serial]
#[cfg(target_os = "linux")]
fn test_save_then_load_default_location() {
    with_config_home(|| {
        let path = default_config_path().unwrap();
        assert_eq!(BridgeConfig::load_or_default(&path), BridgeConfig::default());

        let config = BridgeConfig {
            buffer_queue_capacity: 32,
            overflow: OverflowPolicy::DropOldest,
            required_plugins: vec!["app".to_string()],
            ..BridgeConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(BridgeConfig::load(&path).unwrap(), config);
    });
}

#[test]
fn test_json_and_toml_agree() {
    let dir = tempfile::tempdir().unwrap();
    let config = BridgeConfig {
        message_queue_capacity: 8,
        log_file: Some("bridge.log".into()),
        ..BridgeConfig::default()
    };

    let toml_path = dir.path().join("bridge.toml");
    let json_path = dir.path().join("bridge.json");
    config.save(&toml_path).unwrap();
    config.save(&json_path).unwrap();

    assert_eq!(BridgeConfig::load(&toml_path).unwrap(), config);
    assert_eq!(BridgeConfig::load(&json_path).unwrap(), config);
    assert!(std::fs::read_to_string(&json_path).unwrap().contains("\"message_queue_capacity\": 8"));
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(&path, "overflow = \"drop-oldest\"\n\n[mock]\nbuffer_size = 128\n").unwrap();

    let config = BridgeConfig::load(&path).unwrap();
    assert_eq!(config.overflow, OverflowPolicy::DropOldest);
    assert_eq!(config.mock.buffer_size, 128);
    assert_eq!(config.mock.buffer_interval_ms, 2);
    assert_eq!(config.buffer_queue_capacity, 10);
}
