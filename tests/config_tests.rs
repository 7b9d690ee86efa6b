// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use media_capture::EngineConfig;
use media_capture::constants::pool;
use media_capture::logging::LogLevel;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("media-capture-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_config_default() {
    let config = EngineConfig::default();

    // Check sensible defaults
    assert_eq!(config.log_level, LogLevel::Warn);
    assert_eq!(config.pool_size, pool::DEFAULT_BACKEND_SLOTS);
    assert!(config.synthetic.stable_buffers);
    assert!(!config.synthetic.gpu_handles);
}

#[test]
fn test_missing_file_yields_defaults() {
    let config = EngineConfig::load_from(&temp_path("does-not-exist.json")).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_save_then_load() {
    let path = temp_path("saved/config.json");
    let mut config = EngineConfig::default();
    config.log_level = LogLevel::Debug;
    config.open_timeout_ms = 1_500;
    config.synthetic.camera_devices = 1;

    config.save_to(&path).unwrap();
    let loaded = EngineConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_invalid_json_is_an_error() {
    let path = temp_path("broken.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    let err = EngineConfig::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("broken.json"));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_registry_follows_synthetic_settings() {
    let mut config = EngineConfig::default();
    config.synthetic.camera_devices = 3;
    let engine = media_capture::CaptureEngine::new(config.backend_registry());

    let cameras = engine
        .enumerate_devices(media_capture::CaptureDomain::Camera)
        .unwrap();
    assert_eq!(cameras.len(), 3);
}
