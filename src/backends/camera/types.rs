// SPDX-License-Identifier: GPL-3.0-only

//! Device, stream and unit descriptions shared by capture backends

use crate::media::hw::HardwareSurface;
use crate::media::timebase::Rational;
use std::fmt;

/// Identity of a capture device, for logs
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub card: String,
    pub driver: String,
    pub path: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.card, self.driver, self.path)
    }
}

/// Exact frame rate, `num / denom` frames per second
///
/// A zero denominator is stored as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: denom.max(1),
        }
    }

    pub fn from_int(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// Time base whose unit is one frame
    pub fn frame_period(&self) -> Rational {
        Rational::frame_period(self.num, self.denom)
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.denom {
            1 => write!(f, "{}", self.num),
            denom => write!(f, "{:.2}", self.num as f64 / denom as f64),
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::from_int(30)
    }
}

/// Wire format of the units a capture session produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureFormat {
    /// Semi-planar 4:2:0, already what the pipelines consume
    Nv12,
    /// Packed 4:2:2 (Y0 U Y1 V interleaved)
    Yuyv,
    /// Motion JPEG, one JPEG image per unit
    Mjpeg,
    /// Device-memory surfaces, decoded by the hardware
    Hardware,
}

impl CaptureFormat {
    /// V4L2 FourCC code
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            CaptureFormat::Nv12 | CaptureFormat::Hardware => *b"NV12",
            CaptureFormat::Yuyv => *b"YUYV",
            CaptureFormat::Mjpeg => *b"MJPG",
        }
    }

    /// Parse a V4L2 FourCC code
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"NV12" => Some(CaptureFormat::Nv12),
            b"YUYV" | b"YUY2" => Some(CaptureFormat::Yuyv),
            b"MJPG" | b"JPEG" => Some(CaptureFormat::Mjpeg),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFormat::Hardware => write!(f, "hardware"),
            other => write!(f, "{}", String::from_utf8_lossy(&other.fourcc())),
        }
    }
}

/// Parameters of the video stream selected on an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub format: CaptureFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
    /// Time base of the timestamps the session reports
    pub time_base: Rational,
}

impl fmt::Display for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps",
            self.format, self.width, self.height, self.framerate
        )
    }
}

/// One unit read from a capture session, before decoding
#[derive(Debug)]
pub enum CapturedUnit {
    /// Bytes in the stream's [`CaptureFormat`]
    Raw {
        data: Vec<u8>,
        /// Device timestamp in the stream time base, if the driver set one
        timestamp: Option<i64>,
    },
    /// Frame already decoded into device memory
    Hardware {
        surface: HardwareSurface,
        timestamp: Option<i64>,
    },
}

impl CapturedUnit {
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            CapturedUnit::Raw { timestamp, .. } | CapturedUnit::Hardware { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framerate_display() {
        assert_eq!(Framerate::from_int(30).to_string(), "30");
        assert_eq!(Framerate::new(30000, 1001).to_string(), "29.97");
        assert_eq!(Framerate::new(25, 0).denom, 1);
    }

    #[test]
    fn test_fourcc_parse() {
        assert_eq!(CaptureFormat::from_fourcc(b"YUY2"), Some(CaptureFormat::Yuyv));
        assert_eq!(CaptureFormat::from_fourcc(b"H264"), None);
        assert_eq!(CaptureFormat::Mjpeg.to_string(), "MJPG");
    }
}
