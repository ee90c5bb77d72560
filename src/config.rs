// SPDX-License-Identifier: GPL-3.0-only

//! Persistent SDK configuration
//!
//! Stored as pretty-printed JSON under the user config directory. Missing
//! fields take their defaults so older files keep loading.

use crate::constants::{app_info, capture, encoding, osd, storage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which media framework backs filtering, encoding and muxing
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum BackendKind {
    /// GStreamer when compiled in, software otherwise
    #[default]
    Auto,
    /// Pure-Rust CPU pipeline (raw Y4M output)
    Software,
    /// GStreamer elements (hardware encoders when available)
    Gstreamer,
}

/// Capture device settings
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Framerate
    pub framerate: u32,
    /// Pixel format FourCC (e.g., "NV12", "YUYV", "MJPG")
    pub pixel_format: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: capture::DEFAULT_WIDTH,
            height: capture::DEFAULT_HEIGHT,
            framerate: capture::DEFAULT_FRAMERATE,
            pixel_format: "NV12".to_string(),
        }
    }
}

/// Still image settings
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            jpeg_quality: encoding::SNAPSHOT_JPEG_QUALITY,
        }
    }
}

/// Network stream settings
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// RTSP lower transport ("tcp" or "udp")
    pub transport: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate_kbps: encoding::STREAM_BITRATE_KBPS,
            gop_size: encoding::GOP_SIZE,
            max_b_frames: encoding::MAX_B_FRAMES,
            transport: "tcp".to_string(),
        }
    }
}

/// Encoder selection
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Preferred encoder element name, tried before the built-in priority list
    pub preferred: Option<String>,
    pub backend: BackendKind,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture device path
    pub device_path: String,
    /// Use the built-in synthetic test-pattern device instead of hardware
    pub synthetic: bool,
    pub capture: CaptureSettings,
    /// Where outputs are written while in progress
    pub scratch_dir: PathBuf,
    /// Where finished outputs are moved
    pub storage_dir: PathBuf,
    pub snapshot: SnapshotSettings,
    pub stream: StreamSettings,
    /// Keyframe interval for recordings
    pub gop_size: u32,
    pub osd_enabled_at_start: bool,
    /// TrueType font for the overlay text
    pub osd_font_path: PathBuf,
    pub encoder: EncoderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_path: capture::DEFAULT_DEVICE.to_string(),
            synthetic: false,
            capture: CaptureSettings::default(),
            scratch_dir: PathBuf::from(storage::SCRATCH_DIR),
            storage_dir: PathBuf::from(storage::STORAGE_DIR),
            snapshot: SnapshotSettings::default(),
            stream: StreamSettings::default(),
            gop_size: encoding::GOP_SIZE,
            osd_enabled_at_start: false,
            osd_font_path: PathBuf::from(osd::FONT_PATH),
            encoder: EncoderSettings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::CONFIG_DIR_NAME).join("config.json"))
    }

    /// Load from `path`, falling back to defaults if it is missing or unreadable
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No config file, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Self::default()
            }
        }
    }

    /// Load from the default location
    pub fn load_default() -> Self {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => {
                warn!("No config directory on this system, using defaults");
                Self::default()
            }
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }
}
