// SPDX-License-Identifier: GPL-3.0-only

//! Capture device abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  CameraController   │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CaptureEngine     │  ← one capture thread, fan-out to consumer queues
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureDevice trait │  ← open once per engine start
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!   ┌──────┐  ┌──────────┐
//!   │ V4L2 │  │Synthetic │
//!   └──────┘  └──────────┘
//! ```

pub mod decode;
pub mod engine;
pub mod exposure;
pub mod frame_loop;
pub mod synthetic;
pub mod types;
#[cfg(feature = "v4l2")]
pub mod v4l2;
pub mod v4l2_controls;

pub use engine::{CaptureEngine, ConsumerRegistration, FrameRequest};
pub use synthetic::{FrameInjector, SyntheticDevice};
pub use types::*;

use crate::config::Config;
use crate::errors::CameraError;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// A capture device that can be opened into a session
pub trait CaptureDevice: Send + Sync {
    /// Identity of the device, for logging
    fn describe(&self) -> DeviceInfo;

    /// Open the device and negotiate its video stream
    ///
    /// # Returns
    /// * `Ok((session, params))` - Stream ready to read
    /// * `Err(CameraError::DeviceOpenFailure)` - Device could not be opened
    /// * `Err(CameraError::StreamDiscoveryFailure)` - Format could not be queried
    /// * `Err(CameraError::NoVideoStream)` - No usable video stream
    fn open(&self) -> Result<(Box<dyn CaptureSession>, StreamParams), CameraError>;
}

/// An opened capture stream
pub trait CaptureSession: Send {
    /// Read the next unit
    ///
    /// Waits at most a short poll interval; `Ok(None)` means no unit arrived
    /// in that time.
    fn read_unit(&mut self) -> Result<Option<CapturedUnit>, CameraError>;
}

/// Serializes device opens across engines
///
/// Held only while a device is being opened, never per frame.
#[derive(Debug, Default)]
pub struct DeviceAccessArbiter {
    lock: Mutex<()>,
}

impl DeviceAccessArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide arbiter shared by all engines that do not bring their own
    pub fn global() -> Arc<DeviceAccessArbiter> {
        static GLOBAL: OnceLock<Arc<DeviceAccessArbiter>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(DeviceAccessArbiter::new())))
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build the capture device the configuration asks for
pub fn open_device(config: &Config) -> Result<Arc<dyn CaptureDevice>, CameraError> {
    if config.synthetic {
        return Ok(Arc::new(SyntheticDevice::paced(
            config.capture.width,
            config.capture.height,
            Framerate::from_int(config.capture.framerate),
        )));
    }

    #[cfg(feature = "v4l2")]
    {
        Ok(Arc::new(v4l2::V4l2Device::new(
            &config.device_path,
            &config.capture,
        )))
    }

    #[cfg(not(feature = "v4l2"))]
    {
        Err(CameraError::DeviceOpenFailure(format!(
            "{}: built without V4L2 support (use --synthetic)",
            config.device_path
        )))
    }
}
