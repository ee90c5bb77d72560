// SPDX-License-Identifier: GPL-3.0-only

//! Manual exposure control
//!
//! ISO and EV requests are handed to a background worker through a
//! latest-wins command slot, so callers never block on sensor ioctls. ISO
//! maps linearly onto the sensor's analogue gain range and EV onto its
//! exposure range; both ranges are queried once, on first use.

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::v4l2_controls::{V4L2_CID_ANALOGUE_GAIN, V4L2_CID_EXPOSURE, V4l2ControlDevice};
use crate::constants::exposure::{EV_MAX, EV_MIN, ISO_MAX, ISO_MIN};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Integer range of a device control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub minimum: i32,
    pub maximum: i32,
}

impl ControlRange {
    /// Map `value` from `[from_min, from_max]` linearly onto this range
    pub fn map_linear(&self, value: f64, from_min: f64, from_max: f64) -> i32 {
        let value = value.clamp(from_min, from_max);
        let span = (self.maximum - self.minimum) as f64;
        let mapped = self.minimum as f64 + (value - from_min) * span / (from_max - from_min);
        (mapped.round() as i32).clamp(self.minimum, self.maximum)
    }
}

/// Sensor controls the worker drives
pub trait ControlInterface: Send {
    fn range(&mut self, control_id: u32) -> Option<ControlRange>;

    fn set(&mut self, control_id: u32, value: i32) -> Result<(), String>;
}

impl ControlInterface for V4l2ControlDevice {
    fn range(&mut self, control_id: u32) -> Option<ControlRange> {
        self.query(control_id)
            .filter(|info| !info.disabled)
            .map(|info| ControlRange {
                minimum: info.minimum,
                maximum: info.maximum,
            })
    }

    fn set(&mut self, control_id: u32, value: i32) -> Result<(), String> {
        V4l2ControlDevice::set(self, control_id, value)
    }
}

/// Exposure request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureCommand {
    /// ISO 100..=1600
    SetIso(u32),
    /// Exposure value -4.0..=+4.0
    SetEv(f32),
}

#[derive(Debug, Default)]
struct Slot {
    iso: Option<u32>,
    ev: Option<f32>,
    applying: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct SlotShared {
    slot: Mutex<Slot>,
    changed: Condvar,
}

struct WorkerState {
    controls: Box<dyn ControlInterface>,
    ranges: HashMap<u32, Option<ControlRange>>,
    shared: Arc<SlotShared>,
}

impl WorkerState {
    fn range(&mut self, control_id: u32) -> Option<ControlRange> {
        let controls = &mut self.controls;
        *self
            .ranges
            .entry(control_id)
            .or_insert_with(|| controls.range(control_id))
    }

    fn apply(&mut self, control_id: u32, value: f64, from: (f64, f64), label: &str) {
        let Some(range) = self.range(control_id) else {
            warn!(control = label, "Control not available on this sensor");
            return;
        };
        let raw = range.map_linear(value, from.0, from.1);
        match self.controls.set(control_id, raw) {
            Ok(()) => info!(control = label, requested = value, raw, "Exposure control applied"),
            Err(e) => warn!(control = label, error = %e, "Failed to apply exposure control"),
        }
    }

    fn step(&mut self) -> LoopAction {
        let (iso, ev) = {
            let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
            while slot.iso.is_none() && slot.ev.is_none() && !slot.shutdown {
                slot = self
                    .shared
                    .changed
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if slot.shutdown {
                return LoopAction::Stop;
            }
            slot.applying = true;
            (slot.iso.take(), slot.ev.take())
        };

        if let Some(iso) = iso {
            self.apply(
                V4L2_CID_ANALOGUE_GAIN,
                iso as f64,
                (ISO_MIN as f64, ISO_MAX as f64),
                "iso",
            );
        }
        if let Some(ev) = ev {
            self.apply(V4L2_CID_EXPOSURE, ev as f64, (EV_MIN as f64, EV_MAX as f64), "ev");
        }

        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applying = false;
        self.shared.changed.notify_all();
        LoopAction::Continue
    }
}

/// Background exposure worker
pub struct ExposureWorker {
    shared: Arc<SlotShared>,
    controller: Option<CaptureLoopController>,
}

impl ExposureWorker {
    pub fn start(controls: Box<dyn ControlInterface>) -> Result<Self, String> {
        let shared = Arc::new(SlotShared::default());
        let state = WorkerState {
            controls,
            ranges: HashMap::new(),
            shared: Arc::clone(&shared),
        };
        let controller =
            CaptureLoopController::spawn("camera-exposure", state, WorkerState::step, |_| {})
                .map_err(|e| format!("Failed to spawn exposure worker: {}", e))?;
        Ok(Self {
            shared,
            controller: Some(controller),
        })
    }

    /// Worker driving the V4L2 controls of `device_path`
    pub fn for_v4l2(device_path: &str) -> Result<Self, String> {
        Self::start(Box::new(V4l2ControlDevice::open(device_path)?))
    }

    /// Queue a command; a newer command of the same kind replaces a pending one
    pub fn submit(&self, command: ExposureCommand) {
        let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match command {
            ExposureCommand::SetIso(iso) => {
                let clamped = iso.clamp(ISO_MIN, ISO_MAX);
                if clamped != iso {
                    debug!(requested = iso, clamped, "ISO clamped");
                }
                slot.iso = Some(clamped);
            }
            ExposureCommand::SetEv(ev) => {
                let clamped = ev.clamp(EV_MIN, EV_MAX);
                if clamped != ev {
                    debug!(requested = ev, clamped, "EV clamped");
                }
                slot.ev = Some(clamped);
            }
        }
        drop(slot);
        self.shared.changed.notify_all();
    }

    /// Wait until every submitted command has been applied
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        while slot.iso.is_some() || slot.ev.is_some() || slot.applying {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slot = self
                .shared
                .changed
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn shutdown(&mut self) {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown = true;
        self.shared.changed.notify_all();
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
        }
    }
}

impl Drop for ExposureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct MemoryControls {
        values: Arc<Mutex<HashMap<u32, i32>>>,
        queries: Arc<Mutex<u32>>,
    }

    impl ControlInterface for MemoryControls {
        fn range(&mut self, control_id: u32) -> Option<ControlRange> {
            *self.queries.lock().unwrap() += 1;
            match control_id {
                V4L2_CID_ANALOGUE_GAIN => Some(ControlRange {
                    minimum: 16,
                    maximum: 256,
                }),
                V4L2_CID_EXPOSURE => Some(ControlRange {
                    minimum: 4,
                    maximum: 1600,
                }),
                _ => None,
            }
        }

        fn set(&mut self, control_id: u32, value: i32) -> Result<(), String> {
            self.values.lock().unwrap().insert(control_id, value);
            Ok(())
        }
    }

    #[test]
    fn test_linear_mapping() {
        let range = ControlRange {
            minimum: 0,
            maximum: 1000,
        };
        assert_eq!(range.map_linear(100.0, 100.0, 1600.0), 0);
        assert_eq!(range.map_linear(850.0, 100.0, 1600.0), 500);
        assert_eq!(range.map_linear(5000.0, 100.0, 1600.0), 1000);
        assert_eq!(range.map_linear(0.0, -4.0, 4.0), 500);
    }

    #[test]
    fn test_worker_applies_and_clamps() {
        let controls = MemoryControls::default();
        let worker = ExposureWorker::start(Box::new(controls.clone())).unwrap();

        worker.submit(ExposureCommand::SetIso(1600));
        assert!(worker.wait_idle(Duration::from_secs(2)));
        worker.submit(ExposureCommand::SetEv(-10.0));
        assert!(worker.wait_idle(Duration::from_secs(2)));

        let values = controls.values.lock().unwrap().clone();
        assert_eq!(values.get(&V4L2_CID_ANALOGUE_GAIN), Some(&256));
        assert_eq!(values.get(&V4L2_CID_EXPOSURE), Some(&4));

        worker.submit(ExposureCommand::SetIso(100));
        assert!(worker.wait_idle(Duration::from_secs(2)));
        assert_eq!(
            controls.values.lock().unwrap().get(&V4L2_CID_ANALOGUE_GAIN),
            Some(&16)
        );
        // Ranges are queried once per control
        assert_eq!(*controls.queries.lock().unwrap(), 2);
    }
}
