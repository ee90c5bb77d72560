// SPDX-License-Identifier: MPL-2.0

//! Integration tests for digital zoom

use camera_sdk::media::{CropRect, ZoomController};
use std::sync::Arc;

#[test]
fn test_crop_is_even_and_centered_for_every_level() {
    let (src_w, src_h) = (2112u32, 1568u32);
    for tenths in 10..=80 {
        let crop = CropRect::for_level(src_w, src_h, tenths);
        let level = tenths as f64 / 10.0;
        let expected_w = ((src_w as f64 / level).floor() as u32) & !1;

        assert_eq!(crop.width % 2, 0, "width at {}", level);
        assert_eq!(crop.height % 2, 0, "height at {}", level);
        assert_eq!(crop.x % 2, 0, "x at {}", level);
        assert_eq!(crop.y % 2, 0, "y at {}", level);
        // integer math must agree with the float formula away from exact boundaries
        assert!(crop.width == expected_w || crop.width + 2 == expected_w || crop.width == expected_w + 2);
        assert_eq!(crop.x, ((src_w - crop.width) / 2) & !1);
        assert!(crop.fits(src_w, src_h));
    }
}

#[test]
fn test_crop_at_unit_and_double_zoom() {
    assert_eq!(CropRect::for_level(2112, 1568, 10), CropRect::full(2112, 1568));
    let half = CropRect::for_level(2112, 1568, 20);
    assert_eq!((half.width, half.height), (1056, 784));
    assert_eq!((half.x, half.y), (528, 392));
}

#[test]
fn test_changed_flag_set_once_per_effective_change() {
    let zoom = ZoomController::new(2112, 1568);
    assert!(!zoom.check_and_clear_changed());

    assert!(zoom.zoom_in());
    assert!(zoom.check_and_clear_changed());
    assert!(!zoom.check_and_clear_changed());

    // Clamped at the lower bound: no change, no flag
    assert!(zoom.zoom_out());
    assert!(zoom.check_and_clear_changed());
    assert!(!zoom.zoom_out());
    assert!(!zoom.check_and_clear_changed());
}

#[test]
fn test_zoom_clamps_at_maximum() {
    let zoom = ZoomController::new(640, 480);
    for _ in 0..70 {
        assert!(zoom.zoom_in());
    }
    assert!((zoom.level() - 8.0).abs() < 1e-6);
    zoom.check_and_clear_changed();
    assert!(!zoom.zoom_in());
    assert!(!zoom.check_and_clear_changed());
    assert_eq!(zoom.get_crop(), CropRect::for_level(640, 480, 80));
}

#[test]
fn test_two_observers_both_see_a_change() {
    let zoom = Arc::new(ZoomController::new(1920, 1080));
    let mut recorder = zoom.observer();
    let mut streamer = zoom.observer();

    zoom.zoom_in();
    zoom.zoom_in();
    zoom.zoom_in();

    assert!(recorder.check_and_clear_changed());
    assert!(!recorder.check_and_clear_changed());
    assert!(streamer.check_and_clear_changed());
    assert_eq!(recorder.crop(), CropRect::for_level(1920, 1080, 13));
    assert_eq!(streamer.crop(), recorder.crop());
}
