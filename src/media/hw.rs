// SPDX-License-Identifier: MPL-2.0

//! Hardware acceleration contexts
//!
//! A [`HwDevice`] is the handle filter backends use to decide whether a
//! hardware crop/scale chain is possible. Surfaces allocated against a
//! device share an [`HwFrames`] pool description so a filter graph can accept
//! hardware frames directly instead of uploading them again.

use super::frame::{PixelFormat, SoftwareImage};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

/// Kind of acceleration device behind an [`HwDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwDeviceKind {
    /// CPU-backed stand-in that performs plain copies instead of blits
    Emulated,
    /// VA-API (GStreamer `vapostproc`)
    VaApi,
}

impl fmt::Display for HwDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwDeviceKind::Emulated => write!(f, "emulated"),
            HwDeviceKind::VaApi => write!(f, "vaapi"),
        }
    }
}

#[derive(Debug)]
struct HwDeviceInner {
    kind: HwDeviceKind,
    name: String,
}

/// Reference-counted acceleration device handle
#[derive(Debug, Clone)]
pub struct HwDevice(Arc<HwDeviceInner>);

impl HwDevice {
    pub fn new(kind: HwDeviceKind, name: impl Into<String>) -> Self {
        Self(Arc::new(HwDeviceInner {
            kind,
            name: name.into(),
        }))
    }

    pub fn kind(&self) -> HwDeviceKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Two handles refer to the same device context
    pub fn same_device(&self, other: &HwDevice) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Pool description shared by all surfaces of one hardware stream
#[derive(Debug)]
pub struct HwFrames {
    pub device: HwDevice,
    pub sw_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

pub type HwFramesRef = Arc<HwFrames>;

/// Backing memory of a hardware surface
#[derive(Debug)]
pub enum SurfaceMemory {
    /// CPU memory standing in for device memory
    Emulated(SoftwareImage),
    /// Exported DMA-buf with a tightly packed layout of `size` bytes
    DmaBuf { fd: OwnedFd, size: usize },
}

/// One frame living in device memory
#[derive(Debug)]
pub struct HardwareSurface {
    pub frames: HwFramesRef,
    pub memory: SurfaceMemory,
}

impl HardwareSurface {
    pub fn width(&self) -> u32 {
        self.frames.width
    }

    pub fn height(&self) -> u32 {
        self.frames.height
    }

    pub fn device(&self) -> &HwDevice {
        &self.frames.device
    }

    /// Raw descriptor for DMA-buf surfaces
    pub fn dmabuf_fd(&self) -> Option<i32> {
        match &self.memory {
            SurfaceMemory::DmaBuf { fd, .. } => Some(fd.as_raw_fd()),
            SurfaceMemory::Emulated(_) => None,
        }
    }
}

/// Source of acceleration devices for a capture engine
pub trait HwAccel: Send + Sync {
    /// Create the device context, or explain why none is available
    fn create_device(&self) -> Result<HwDevice, String>;
}

/// Always-available emulated device, used by tests and software builds
/// that want to exercise the hardware chain shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmulatedHwAccel;

impl HwAccel for EmulatedHwAccel {
    fn create_device(&self) -> Result<HwDevice, String> {
        Ok(HwDevice::new(HwDeviceKind::Emulated, "emulated0"))
    }
}
