// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture device
//!
//! Produces NV12 test-pattern frames without any hardware. In paced mode
//! frames are generated at the configured framerate (used by `--synthetic`);
//! in injected mode nothing is produced until a [`FrameInjector`] queues
//! frames or read failures, which makes capture behavior deterministic in
//! tests. Optionally frames are delivered as emulated hardware surfaces.

use super::types::{CaptureFormat, CapturedUnit, DeviceInfo, Framerate, StreamParams};
use super::{CaptureDevice, CaptureSession};
use crate::constants::timing::CAPTURE_POLL_INTERVAL;
use crate::errors::CameraError;
use crate::media::frame::{PixelFormat, SoftwareImage};
use crate::media::hw::{HardwareSurface, HwDevice, HwFrames, HwFramesRef, SurfaceMemory};
use crate::media::timebase::Rational;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug)]
enum Injected {
    Pattern,
    Image(SoftwareImage),
    ReadError(String),
}

#[derive(Debug, Default)]
struct InjectorShared {
    events: Mutex<VecDeque<Injected>>,
    changed: Condvar,
    delivered: AtomicU64,
}

/// Handle for feeding an injected-mode [`SyntheticDevice`]
#[derive(Debug, Clone, Default)]
pub struct FrameInjector {
    shared: Arc<InjectorShared>,
}

impl FrameInjector {
    fn push(&self, event: Injected) {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
        self.shared.changed.notify_all();
    }

    /// Queue `count` test-pattern frames
    pub fn inject_frames(&self, count: usize) {
        let mut events = self.shared.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.extend((0..count).map(|_| Injected::Pattern));
        drop(events);
        self.shared.changed.notify_all();
    }

    /// Queue one specific image; it must match the device size to decode
    pub fn inject_image(&self, image: SoftwareImage) {
        self.push(Injected::Image(image));
    }

    /// Make the next read fail, which ends the capture loop
    pub fn fail_next_read(&self, message: &str) {
        self.push(Injected::ReadError(message.to_string()));
    }

    /// Events queued but not yet read
    pub fn pending(&self) -> usize {
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Frames handed to a session so far
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    /// Block until every queued event has been read, or `timeout` elapses
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.shared.events.lock().unwrap_or_else(PoisonError::into_inner);
        while !events.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = self
                .shared
                .changed
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Paced,
    Injected,
}

/// Test-pattern capture device
#[derive(Debug)]
pub struct SyntheticDevice {
    width: u32,
    height: u32,
    framerate: Framerate,
    mode: Mode,
    injector: FrameInjector,
    hw_device: Option<HwDevice>,
    fail_open: AtomicBool,
    open_count: AtomicUsize,
}

impl SyntheticDevice {
    /// Device that produces frames only when injected
    pub fn new(width: u32, height: u32, framerate: Framerate) -> Self {
        Self {
            width,
            height,
            framerate,
            mode: Mode::Injected,
            injector: FrameInjector::default(),
            hw_device: None,
            fail_open: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
        }
    }

    /// Device that generates frames in real time
    pub fn paced(width: u32, height: u32, framerate: Framerate) -> Self {
        Self {
            mode: Mode::Paced,
            ..Self::new(width, height, framerate)
        }
    }

    /// Deliver frames as emulated hardware surfaces of `device`
    pub fn with_hardware_frames(mut self, device: HwDevice) -> Self {
        self.hw_device = Some(device);
        self
    }

    pub fn injector(&self) -> FrameInjector {
        self.injector.clone()
    }

    /// Make subsequent opens fail
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    fn params(&self) -> StreamParams {
        StreamParams {
            format: if self.hw_device.is_some() {
                CaptureFormat::Hardware
            } else {
                CaptureFormat::Nv12
            },
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            time_base: Rational::MICROS,
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn describe(&self) -> DeviceInfo {
        DeviceInfo {
            card: "Synthetic test pattern".to_string(),
            driver: "synthetic".to_string(),
            path: format!("synthetic:{}x{}", self.width, self.height),
        }
    }

    fn open(&self) -> Result<(Box<dyn CaptureSession>, StreamParams), CameraError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CameraError::DeviceOpenFailure(format!(
                "{}: simulated open failure",
                self.describe().path
            )));
        }
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CameraError::NoVideoStream);
        }

        self.open_count.fetch_add(1, Ordering::SeqCst);
        let params = self.params();
        info!(params = %params, mode = ?self.mode, "Opened synthetic device");

        let hw_frames = self.hw_device.as_ref().map(|device| {
            Arc::new(HwFrames {
                device: device.clone(),
                sw_format: PixelFormat::Nv12,
                width: self.width,
                height: self.height,
            })
        });

        Ok((
            Box::new(SyntheticSession {
                shared: Arc::clone(&self.injector.shared),
                params,
                mode: self.mode,
                hw_frames,
                index: 0,
                next_due: Instant::now(),
            }),
            params,
        ))
    }
}

struct SyntheticSession {
    shared: Arc<InjectorShared>,
    params: StreamParams,
    mode: Mode,
    hw_frames: Option<HwFramesRef>,
    index: u64,
    next_due: Instant,
}

impl SyntheticSession {
    fn next_injected(&self) -> Option<Injected> {
        let mut events = self.shared.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.is_empty() {
            events = self
                .shared
                .changed
                .wait_timeout(events, CAPTURE_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let event = events.pop_front();
        drop(events);
        if event.is_some() {
            self.shared.changed.notify_all();
        }
        event
    }

    fn wait_for_slot(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next_due {
            let wait = (self.next_due - now).min(CAPTURE_POLL_INTERVAL);
            std::thread::sleep(wait);
            if Instant::now() < self.next_due {
                return false;
            }
        }
        self.next_due += self.params.framerate.frame_period().to_duration(1);
        true
    }

    fn pattern(&self) -> Result<SoftwareImage, CameraError> {
        let (width, height) = (self.params.width, self.params.height);
        let mut data = vec![128u8; PixelFormat::Nv12.frame_size(width, height)];
        let w = width as usize;
        for (row, line) in data[..w * height as usize].chunks_mut(w).enumerate() {
            line.fill((row as u64 + self.index * 4) as u8);
        }
        SoftwareImage::new(PixelFormat::Nv12, width, height, data)
            .map_err(|e| CameraError::DeviceReadFailure(e.to_string()))
    }

    fn unit(&mut self, image: SoftwareImage) -> CapturedUnit {
        let timestamp = Some(Rational::rescale(
            self.index as i64,
            self.params.framerate.frame_period(),
            self.params.time_base,
        ));
        self.index += 1;
        self.shared.delivered.fetch_add(1, Ordering::SeqCst);

        match &self.hw_frames {
            Some(frames) => CapturedUnit::Hardware {
                surface: HardwareSurface {
                    frames: Arc::clone(frames),
                    memory: SurfaceMemory::Emulated(image),
                },
                timestamp,
            },
            None => CapturedUnit::Raw {
                data: image.into_data(),
                timestamp,
            },
        }
    }
}

impl CaptureSession for SyntheticSession {
    fn read_unit(&mut self) -> Result<Option<CapturedUnit>, CameraError> {
        match self.mode {
            Mode::Paced => {
                if !self.wait_for_slot() {
                    return Ok(None);
                }
                let image = self.pattern()?;
                Ok(Some(self.unit(image)))
            }
            Mode::Injected => match self.next_injected() {
                None => Ok(None),
                Some(Injected::Pattern) => {
                    let image = self.pattern()?;
                    Ok(Some(self.unit(image)))
                }
                Some(Injected::Image(image)) => Ok(Some(self.unit(image))),
                Some(Injected::ReadError(message)) => {
                    debug!(message = %message, "Injected read failure");
                    Err(CameraError::DeviceReadFailure(message))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_frames_have_frame_period_timestamps() {
        let device = SyntheticDevice::new(16, 8, Framerate::from_int(30));
        let injector = device.injector();
        let (mut session, params) = device.open().unwrap();
        assert_eq!(params.format, CaptureFormat::Nv12);

        assert!(session.read_unit().unwrap().is_none());

        injector.inject_frames(2);
        let first = session.read_unit().unwrap().unwrap();
        let second = session.read_unit().unwrap().unwrap();
        assert_eq!(first.timestamp(), Some(0));
        assert_eq!(second.timestamp(), Some(33_333));
        assert_eq!(injector.delivered(), 2);
        assert!(injector.wait_drained(Duration::from_millis(10)));
    }

    #[test]
    fn test_injected_read_failure() {
        let device = SyntheticDevice::new(16, 8, Framerate::from_int(30));
        let (mut session, _) = device.open().unwrap();
        device.injector().fail_next_read("unplugged");
        assert_eq!(
            session.read_unit().unwrap_err(),
            CameraError::DeviceReadFailure("unplugged".to_string())
        );
    }

    #[test]
    fn test_open_failure_and_count() {
        let device = SyntheticDevice::new(16, 8, Framerate::from_int(30));
        device.set_fail_open(true);
        assert!(matches!(device.open(), Err(CameraError::DeviceOpenFailure(_))));
        device.set_fail_open(false);
        assert!(device.open().is_ok());
        assert_eq!(device.open_count(), 1);
    }

    #[test]
    fn test_hardware_frames() {
        let device = SyntheticDevice::new(16, 8, Framerate::from_int(30))
            .with_hardware_frames(HwDevice::new(crate::media::hw::HwDeviceKind::Emulated, "emu"));
        let (mut session, params) = device.open().unwrap();
        assert_eq!(params.format, CaptureFormat::Hardware);
        device.injector().inject_frames(1);
        assert!(matches!(
            session.read_unit().unwrap(),
            Some(CapturedUnit::Hardware { .. })
        ));
    }
}
