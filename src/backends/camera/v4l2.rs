// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture device
//!
//! Opens a `/dev/videoN` node, negotiates the configured size, framerate
//! and pixel format, and reads frames through a memory-mapped stream.

use super::types::{CaptureFormat, CapturedUnit, DeviceInfo, Framerate, StreamParams};
use super::{CaptureDevice, CaptureSession};
use crate::config::CaptureSettings;
use crate::constants::capture::V4L2_BUFFER_COUNT;
use crate::constants::timing::CAPTURE_POLL_INTERVAL;
use crate::errors::CameraError;
use crate::media::timebase::Rational;
use std::io;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

/// V4L2 video capture node
#[derive(Debug, Clone)]
pub struct V4l2Device {
    path: String,
    settings: CaptureSettings,
}

impl V4l2Device {
    pub fn new(path: &str, settings: &CaptureSettings) -> Self {
        Self {
            path: path.to_string(),
            settings: settings.clone(),
        }
    }

    fn requested_format(&self) -> Result<CaptureFormat, CameraError> {
        let mut fourcc = [b' '; 4];
        for (dst, src) in fourcc.iter_mut().zip(self.settings.pixel_format.bytes()) {
            *dst = src;
        }
        CaptureFormat::from_fourcc(&fourcc).ok_or_else(|| {
            CameraError::DeviceOpenFailure(format!(
                "unsupported pixel format '{}'",
                self.settings.pixel_format
            ))
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn describe(&self) -> DeviceInfo {
        let mut info = DeviceInfo {
            card: String::new(),
            driver: String::new(),
            path: self.path.clone(),
        };
        if let Ok(dev) = Device::with_path(&self.path)
            && let Ok(caps) = dev.query_caps()
        {
            info.card = caps.card;
            info.driver = caps.driver;
        }
        info
    }

    fn open(&self) -> Result<(Box<dyn CaptureSession>, StreamParams), CameraError> {
        let requested = self.requested_format()?;
        let dev = Device::with_path(&self.path)
            .map_err(|e| CameraError::DeviceOpenFailure(format!("{}: {}", self.path, e)))?;

        let current = dev
            .format()
            .map_err(|e| CameraError::StreamDiscoveryFailure(format!("{}: {}", self.path, e)))?;
        debug!(
            width = current.width,
            height = current.height,
            fourcc = ?current.fourcc,
            "Current V4L2 format"
        );

        let format = Format::new(
            self.settings.width,
            self.settings.height,
            FourCC::new(&requested.fourcc()),
        );
        let actual = dev
            .set_format(&format)
            .map_err(|e| CameraError::DeviceOpenFailure(format!("Failed to set format: {}", e)))?;

        let negotiated = CaptureFormat::from_fourcc(&actual.fourcc.repr)
            .ok_or(CameraError::NoVideoStream)?;
        if actual.width == 0 || actual.height == 0 || actual.width % 2 != 0 || actual.height % 2 != 0
        {
            return Err(CameraError::NoVideoStream);
        }

        let framerate = match dev.set_params(&Parameters::with_fps(self.settings.framerate)) {
            Ok(params) if params.interval.numerator > 0 => {
                Framerate::new(params.interval.denominator, params.interval.numerator)
            }
            Ok(_) => Framerate::from_int(self.settings.framerate),
            Err(e) => {
                warn!(error = %e, "Failed to set framerate, assuming requested rate");
                Framerate::from_int(self.settings.framerate)
            }
        };

        let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, V4L2_BUFFER_COUNT)
            .map_err(|e| CameraError::DeviceOpenFailure(format!("Failed to create stream: {}", e)))?;
        stream.set_timeout(CAPTURE_POLL_INTERVAL);

        let params = StreamParams {
            format: negotiated,
            width: actual.width,
            height: actual.height,
            framerate,
            time_base: Rational::MICROS,
        };
        info!(path = %self.path, params = %params, "V4L2 stream configured");

        Ok((
            Box::new(V4l2Session {
                stream,
                _device: dev,
                path: self.path.clone(),
            }),
            params,
        ))
    }
}

struct V4l2Session {
    stream: Stream<'static>,
    _device: Device,
    path: String,
}

impl CaptureSession for V4l2Session {
    fn read_unit(&mut self) -> Result<Option<CapturedUnit>, CameraError> {
        let (buf, meta) = match self.stream.next() {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => {
                return Err(CameraError::DeviceReadFailure(format!("{}: {}", self.path, e)));
            }
        };

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let micros = meta.timestamp.sec as i64 * 1_000_000 + meta.timestamp.usec as i64;
        Ok(Some(CapturedUnit::Raw {
            data: buf[..used].to_vec(),
            timestamp: (micros > 0).then_some(micros),
        }))
    }
}
