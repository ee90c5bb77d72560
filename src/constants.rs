// SPDX-License-Identifier: GPL-3.0-only

//! SDK-wide constants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named output resolutions accepted by recording and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputResolution {
    /// 1920x1080
    #[serde(rename = "1080p")]
    P1080,
    /// 1280x720
    #[serde(rename = "720p")]
    P720,
    /// 640x360
    #[serde(rename = "360p")]
    P360,
}

impl OutputResolution {
    /// All presets, largest first
    pub const ALL: [OutputResolution; 3] = [
        OutputResolution::P1080,
        OutputResolution::P720,
        OutputResolution::P360,
    ];

    /// Key used on the command surface ("1080p", "720p", "360p")
    pub fn key(&self) -> &'static str {
        match self {
            OutputResolution::P1080 => "1080p",
            OutputResolution::P720 => "720p",
            OutputResolution::P360 => "360p",
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            OutputResolution::P1080 => (1920, 1080),
            OutputResolution::P720 => (1280, 720),
            OutputResolution::P360 => (640, 360),
        }
    }

    /// Recording bitrate in kbps
    ///
    /// Anything above 720p gets 8 Mbps, 720p and below 4 Mbps.
    pub fn bitrate_kbps(&self) -> u32 {
        let (width, height) = self.dimensions();
        recording_bitrate_kbps(width, height)
    }
}

/// Recording bitrate for arbitrary output dimensions
pub fn recording_bitrate_kbps(width: u32, height: u32) -> u32 {
    if width * height > 1280 * 720 {
        8_000
    } else {
        4_000
    }
}

impl fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for OutputResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputResolution::ALL
            .into_iter()
            .find(|res| res.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unknown resolution '{}' (expected one of: 1080p, 720p, 360p)",
                    s
                )
            })
    }
}

/// Digital zoom limits, in tenths of a zoom factor
pub mod zoom {
    /// 1.0x
    pub const MIN_TENTHS: u32 = 10;
    /// 8.0x
    pub const MAX_TENTHS: u32 = 80;
    /// 0.1x per step
    pub const STEP_TENTHS: u32 = 1;
}

/// Encoder defaults
pub mod encoding {
    /// Keyframe interval in frames
    pub const GOP_SIZE: u32 = 50;
    /// B-frames are disabled for low latency
    pub const MAX_B_FRAMES: u32 = 0;
    /// Streaming bitrate in kbps
    pub const STREAM_BITRATE_KBPS: u32 = 4_000;
    /// JPEG quality for snapshots (0-100)
    pub const SNAPSHOT_JPEG_QUALITY: u8 = 92;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Bounded wait for a snapshot frame
    pub const SNAPSHOT_FRAME_TIMEOUT: Duration = Duration::from_secs(2);
    /// Device read poll interval; the capture loop checks its stop signal
    /// at least this often
    pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(50);
    /// Log capture statistics every N frames
    pub const FRAME_LOG_INTERVAL: u64 = 300;
    /// Maximum wait for a GStreamer pipeline to drain on end-of-stream
    pub const EOS_TIMEOUT_SECS: u64 = 10;
}

/// Capture defaults of the reference hardware
pub mod capture {
    pub const DEFAULT_DEVICE: &str = "/dev/video0";
    pub const DEFAULT_WIDTH: u32 = 2112;
    pub const DEFAULT_HEIGHT: u32 = 1568;
    pub const DEFAULT_FRAMERATE: u32 = 30;
    /// mmap buffers requested from V4L2 drivers
    pub const V4L2_BUFFER_COUNT: u32 = 4;
}

/// Storage locations and media naming
pub mod storage {
    /// Fast scratch location where outputs are written first
    pub const SCRATCH_DIR: &str = "/tmp/";
    /// Durable location completed outputs are moved to
    pub const STORAGE_DIR: &str = "/mnt/sdcard/";
    /// chrono format of media base names
    pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
    pub const SNAPSHOT_EXTENSION: &str = "jpg";
}

/// Exposure control ranges
pub mod exposure {
    pub const ISO_MIN: u32 = 100;
    pub const ISO_MAX: u32 = 1600;
    pub const EV_MIN: f32 = -4.0;
    pub const EV_MAX: f32 = 4.0;
}

/// OSD layout
pub mod osd {
    /// Text height in pixels at 1080p
    pub const FONT_PX_1080P: u32 = 32;
    /// Default overlay font
    pub const FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
    /// Luma attenuation of the background band (out of 256)
    pub const BAND_LUMA_SCALE: u32 = 112;
    /// Left/bottom margin in pixels at 1080p
    pub const MARGIN_1080P: u32 = 24;
}

/// Application information
pub mod app_info {
    /// Version string including the commit it was built from
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Config directory name under the user's config dir
    pub const CONFIG_DIR_NAME: &str = "camera-sdk";
}
