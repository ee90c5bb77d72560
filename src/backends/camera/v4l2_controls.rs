// SPDX-License-Identifier: GPL-3.0-only

//! Sensor control ioctls
//!
//! Only the two controls manual exposure needs are exposed: analogue gain
//! (image source class) and exposure time in sensor lines (user class).

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const CLASS_USER: u32 = 0x0098_0000;
const CLASS_IMAGE_SOURCE: u32 = 0x009e_0000;
const CID_OFFSET: u32 = 0x900;

pub const V4L2_CID_EXPOSURE: u32 = CLASS_USER | CID_OFFSET | 17;
pub const V4L2_CID_ANALOGUE_GAIN: u32 = CLASS_IMAGE_SOURCE | CID_OFFSET | 3;

const FLAG_DISABLED: u32 = 0x0001;

/// `_IOWR('V', nr, size)`
const fn iowr(nr: u32, size: usize) -> libc::c_ulong {
    ((3u32 << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr) as libc::c_ulong
}

const VIDIOC_G_CTRL: libc::c_ulong = iowr(27, std::mem::size_of::<RawControl>());
const VIDIOC_S_CTRL: libc::c_ulong = iowr(28, std::mem::size_of::<RawControl>());
const VIDIOC_QUERYCTRL: libc::c_ulong = iowr(36, std::mem::size_of::<RawQueryCtrl>());

#[repr(C)]
#[derive(Default)]
struct RawControl {
    id: u32,
    value: i32,
}

#[repr(C)]
#[derive(Default)]
struct RawQueryCtrl {
    id: u32,
    kind: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Range and state of one control as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub disabled: bool,
}

impl From<&RawQueryCtrl> for ControlInfo {
    fn from(raw: &RawQueryCtrl) -> Self {
        let len = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
        Self {
            name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
            minimum: raw.minimum,
            maximum: raw.maximum,
            step: raw.step,
            default_value: raw.default_value,
            disabled: raw.flags & FLAG_DISABLED != 0,
        }
    }
}

/// Control descriptor on a V4L2 node
///
/// Opened separately from the capture stream, which may hold the same node.
#[derive(Debug)]
pub struct V4l2ControlDevice {
    file: File,
    path: String,
}

impl V4l2ControlDevice {
    pub fn open(device_path: &str) -> Result<Self, String> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .map(|file| Self {
                file,
                path: device_path.to_string(),
            })
            .map_err(|e| format!("Failed to open {}: {}", device_path, e))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn ioctl<T>(&self, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
        // SAFETY: `arg` is a #[repr(C)] struct matching the size encoded in `request`
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request, arg as *mut T) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Driver description of a control, `None` when unsupported
    pub fn query(&self, control_id: u32) -> Option<ControlInfo> {
        let mut raw = RawQueryCtrl {
            id: control_id,
            ..Default::default()
        };
        match self.ioctl(VIDIOC_QUERYCTRL, &mut raw) {
            Ok(()) => Some(ControlInfo::from(&raw)),
            Err(e) => {
                debug!(device_path = %self.path, control_id, error = %e, "Control not supported");
                None
            }
        }
    }

    pub fn get(&self, control_id: u32) -> Option<i32> {
        let mut raw = RawControl {
            id: control_id,
            value: 0,
        };
        self.ioctl(VIDIOC_G_CTRL, &mut raw).ok().map(|()| raw.value)
    }

    /// Write a control; the driver may clamp the value
    pub fn set(&self, control_id: u32, value: i32) -> Result<(), String> {
        let mut raw = RawControl {
            id: control_id,
            value,
        };
        if let Err(e) = self.ioctl(VIDIOC_S_CTRL, &mut raw) {
            warn!(device_path = %self.path, control_id, value, error = %e, "Failed to set control");
            return Err(format!("Failed to set control {:#x}: {}", control_id, e));
        }
        if raw.value != value {
            debug!(
                device_path = %self.path,
                control_id,
                requested = value,
                applied = raw.value,
                "Control value clamped by driver"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_numbers_match_kernel_headers() {
        assert_eq!(VIDIOC_G_CTRL, 0xC008_561B);
        assert_eq!(VIDIOC_S_CTRL, 0xC008_561C);
        assert_eq!(VIDIOC_QUERYCTRL, 0xC044_5624);
    }

    #[test]
    fn test_control_ids() {
        assert_eq!(V4L2_CID_EXPOSURE, 0x0098_0911);
        assert_eq!(V4L2_CID_ANALOGUE_GAIN, 0x009e_0903);
    }

    #[test]
    fn test_info_from_raw() {
        let mut raw = RawQueryCtrl {
            minimum: 16,
            maximum: 256,
            flags: FLAG_DISABLED,
            ..Default::default()
        };
        raw.name[..13].copy_from_slice(b"Analogue Gain");
        let info = ControlInfo::from(&raw);
        assert_eq!(info.name, "Analogue Gain");
        assert_eq!((info.minimum, info.maximum), (16, 256));
        assert!(info.disabled);
    }

    #[test]
    fn test_open_missing_node_fails() {
        assert!(V4l2ControlDevice::open("/dev/does-not-exist").is_err());
    }
}
