// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use camera_sdk::constants::{OutputResolution, recording_bitrate_kbps};

#[test]
fn test_resolution_presets() {
    assert_eq!(OutputResolution::ALL.len(), 3);
    assert_eq!(OutputResolution::P1080.dimensions(), (1920, 1080));
    assert_eq!(OutputResolution::P720.dimensions(), (1280, 720));
    assert_eq!(OutputResolution::P360.dimensions(), (640, 360));
}

#[test]
fn test_resolution_keys_parse() {
    for preset in OutputResolution::ALL {
        let parsed: OutputResolution = preset.key().parse().unwrap();
        assert_eq!(parsed, preset);
    }
    assert_eq!("720P".parse::<OutputResolution>().unwrap(), OutputResolution::P720);
    assert!("4k".parse::<OutputResolution>().is_err());
    assert!("".parse::<OutputResolution>().is_err());
}

#[test]
fn test_recording_bitrate_threshold() {
    // Above 720p gets the higher rate
    assert_eq!(OutputResolution::P1080.bitrate_kbps(), 8000);
    assert_eq!(OutputResolution::P720.bitrate_kbps(), 4000);
    assert_eq!(OutputResolution::P360.bitrate_kbps(), 4000);
    assert_eq!(recording_bitrate_kbps(1282, 720), 8000);
}

#[test]
fn test_presets_are_even() {
    for preset in OutputResolution::ALL {
        let (width, height) = preset.dimensions();
        assert_eq!(width % 2, 0);
        assert_eq!(height % 2, 0);
    }
}
