// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_sdk::Config;
use camera_sdk::config::BackendKind;
use std::path::PathBuf;

fn temp_config_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("camera-sdk-config-{}", uuid::Uuid::new_v4()))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.device_path, "/dev/video0");
    assert_eq!((config.capture.width, config.capture.height), (2112, 1568));
    assert_eq!(config.capture.framerate, 30);
    assert_eq!(config.scratch_dir, PathBuf::from("/tmp/"));
    assert_eq!(config.storage_dir, PathBuf::from("/mnt/sdcard/"));
    assert_eq!(config.gop_size, 50);
    assert!(!config.osd_enabled_at_start, "OSD should start disabled");
    assert_eq!(
        config.osd_font_path,
        PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
    );
}

#[test]
fn test_stream_and_snapshot_defaults() {
    let config = Config::default();
    assert_eq!((config.stream.width, config.stream.height), (1280, 720));
    assert_eq!(config.stream.bitrate_kbps, 4000);
    assert_eq!(config.stream.max_b_frames, 0);
    assert_eq!(config.stream.transport, "tcp");
    assert_eq!((config.snapshot.width, config.snapshot.height), (1920, 1080));
    assert_eq!(config.snapshot.jpeg_quality, 92);
}

#[test]
fn test_config_save_and_load() {
    let path = temp_config_path();
    let mut config = Config::default();
    config.device_path = "/dev/video2".to_string();
    config.osd_enabled_at_start = true;
    config.osd_font_path = PathBuf::from("/opt/fonts/Mono.ttf");
    config.encoder.backend = BackendKind::Software;
    config.encoder.preferred = Some("x264enc".to_string());

    config.save(&path).expect("save should create the directory");
    let loaded = Config::load(&path);
    assert_eq!(loaded, config);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_missing_or_corrupt_file_falls_back_to_defaults() {
    let path = temp_config_path();
    assert_eq!(Config::load(&path), Config::default());

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();
    assert_eq!(Config::load(&path), Config::default());

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let path = temp_config_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "gop_size": 25, "stream": { "bitrate_kbps": 2500 } }"#).unwrap();

    let config = Config::load(&path);
    assert_eq!(config.gop_size, 25);
    assert_eq!(config.stream.bitrate_kbps, 2500);
    assert_eq!(config.stream.width, 1280);
    assert_eq!(config.device_path, "/dev/video0");

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
}
