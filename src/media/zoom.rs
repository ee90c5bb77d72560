// SPDX-License-Identifier: MPL-2.0

//! Digital zoom state
//!
//! The zoom level is kept in integer tenths so repeated steps never drift.
//! Every real level change bumps a version counter; pipelines hold a
//! [`ZoomObserver`] that compares against it, so any number of concurrent
//! pipelines each see every change exactly once without consuming it for the
//! others. The controller-wide [`ZoomController::check_and_clear_changed`]
//! flag remains for single-observer callers.

use crate::constants::zoom::{MAX_TENTHS, MIN_TENTHS, STEP_TENTHS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Centered, even-aligned crop of the source frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Crop of a `src_width` x `src_height` frame at `tenths / 10` zoom
    pub fn for_level(src_width: u32, src_height: u32, tenths: u32) -> Self {
        let tenths = tenths.max(MIN_TENTHS) as u64;
        let width = ((src_width as u64 * 10 / tenths) as u32) & !1;
        let height = ((src_height as u64 * 10 / tenths) as u32) & !1;
        Self {
            x: ((src_width - width) / 2) & !1,
            y: ((src_height - height) / 2) & !1,
            width,
            height,
        }
    }

    /// Uncropped frame
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Whether the rectangle lies inside a `width` x `height` frame
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x + self.width <= width
            && self.y + self.height <= height
    }
}

#[derive(Debug)]
struct ZoomState {
    tenths: u32,
    crop: CropRect,
    version: u64,
}

/// Thread-safe zoom level to crop rectangle translator
#[derive(Debug)]
pub struct ZoomController {
    src_width: u32,
    src_height: u32,
    state: Mutex<ZoomState>,
    changed: AtomicBool,
}

impl ZoomController {
    pub fn new(src_width: u32, src_height: u32) -> Self {
        Self {
            src_width,
            src_height,
            state: Mutex::new(ZoomState {
                tenths: MIN_TENTHS,
                crop: CropRect::for_level(src_width, src_height, MIN_TENTHS),
                version: 0,
            }),
            changed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ZoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, delta: i32) -> bool {
        let mut state = self.lock();
        let target = (state.tenths as i32 + delta).clamp(MIN_TENTHS as i32, MAX_TENTHS as i32) as u32;
        if target == state.tenths {
            return false;
        }

        state.tenths = target;
        state.crop = CropRect::for_level(self.src_width, self.src_height, target);
        state.version += 1;
        self.changed.store(true, Ordering::SeqCst);

        debug!(
            level = target as f32 / 10.0,
            crop_x = state.crop.x,
            crop_y = state.crop.y,
            crop_w = state.crop.width,
            crop_h = state.crop.height,
            "Zoom changed"
        );
        true
    }

    /// Step the zoom level up. Returns false at the upper bound.
    pub fn zoom_in(&self) -> bool {
        self.step(STEP_TENTHS as i32)
    }

    /// Step the zoom level down. Returns false at the lower bound.
    pub fn zoom_out(&self) -> bool {
        self.step(-(STEP_TENTHS as i32))
    }

    /// Current zoom factor (1.0 ..= 8.0)
    pub fn level(&self) -> f32 {
        self.lock().tenths as f32 / 10.0
    }

    pub fn get_crop(&self) -> CropRect {
        self.lock().crop
    }

    /// Monotonic count of level changes
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Read and clear the controller-wide change flag
    pub fn check_and_clear_changed(&self) -> bool {
        self.changed.swap(false, Ordering::SeqCst)
    }

    /// Consistent (version, crop) pair
    fn snapshot(&self) -> (u64, CropRect) {
        let state = self.lock();
        (state.version, state.crop)
    }

    /// Independent change observer starting at the current version
    pub fn observer(self: &Arc<Self>) -> ZoomObserver {
        let (seen, crop) = self.snapshot();
        ZoomObserver {
            zoom: Arc::clone(self),
            seen,
            crop,
        }
    }
}

/// Per-pipeline view of a shared [`ZoomController`]
#[derive(Debug)]
pub struct ZoomObserver {
    zoom: Arc<ZoomController>,
    seen: u64,
    crop: CropRect,
}

impl ZoomObserver {
    /// Returns true once per batch of changes since the previous call
    pub fn check_and_clear_changed(&mut self) -> bool {
        let (version, crop) = self.zoom.snapshot();
        if version == self.seen {
            return false;
        }
        self.seen = version;
        self.crop = crop;
        true
    }

    /// Crop as of the last observed change
    pub fn crop(&self) -> CropRect {
        self.crop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_crop_is_full_frame() {
        let zoom = ZoomController::new(2112, 1568);
        assert_eq!(zoom.get_crop(), CropRect::full(2112, 1568));
        assert_eq!(zoom.level(), 1.0);
    }

    #[test]
    fn test_zoom_out_at_minimum_is_noop() {
        let zoom = ZoomController::new(2112, 1568);
        assert!(!zoom.zoom_out());
        assert!(!zoom.check_and_clear_changed());
        assert_eq!(zoom.version(), 0);
    }

    #[test]
    fn test_observers_are_independent() {
        let zoom = Arc::new(ZoomController::new(2112, 1568));
        let mut recorder = zoom.observer();
        let mut streamer = zoom.observer();

        zoom.zoom_in();

        assert!(recorder.check_and_clear_changed());
        assert!(!recorder.check_and_clear_changed());
        assert!(streamer.check_and_clear_changed());
        assert_eq!(recorder.crop(), streamer.crop());
    }

    #[test]
    fn test_observer_coalesces_bursts() {
        let zoom = Arc::new(ZoomController::new(2112, 1568));
        let mut observer = zoom.observer();
        zoom.zoom_in();
        zoom.zoom_in();
        zoom.zoom_in();

        assert!(observer.check_and_clear_changed());
        assert!(!observer.check_and_clear_changed());
        assert_eq!(observer.crop(), CropRect::for_level(2112, 1568, 13));
    }
}
