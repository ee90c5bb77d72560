// SPDX-License-Identifier: GPL-3.0-only

//! Decoding of captured units into frames
//!
//! Every unit becomes an NV12 software frame, except hardware surfaces
//! which are passed through untouched. Timestamps are kept in the stream
//! time base; units without a device timestamp get one synthesized from
//! the frame counter and the negotiated framerate.

use super::types::{CaptureFormat, CapturedUnit, StreamParams};
use crate::errors::FrameError;
use crate::media::convert;
use crate::media::frame::{FrameBuffer, PixelFormat, SoftwareImage};
use crate::media::timebase::Rational;
use std::fmt;

/// Why a unit could not be decoded
#[derive(Debug)]
pub enum DecodeError {
    Layout(FrameError),
    Jpeg(String),
    /// Hardware surface arrived on a raw stream or vice versa
    UnexpectedUnit,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Layout(e) => write!(f, "{}", e),
            DecodeError::Jpeg(msg) => write!(f, "MJPEG decode failed: {}", msg),
            DecodeError::UnexpectedUnit => write!(f, "unit does not match stream format"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<FrameError> for DecodeError {
    fn from(e: FrameError) -> Self {
        DecodeError::Layout(e)
    }
}

/// Stateful decoder for one capture session
pub struct FrameDecoder {
    params: StreamParams,
    decoded: u64,
}

impl FrameDecoder {
    pub fn new(params: StreamParams) -> Self {
        Self { params, decoded: 0 }
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Decode one unit into a frame stamped in the stream time base
    pub fn decode(&mut self, unit: CapturedUnit) -> Result<FrameBuffer, DecodeError> {
        let timestamp = unit.timestamp().unwrap_or_else(|| self.synthesized_timestamp());
        let time_base = self.params.time_base;

        let frame = match (unit, self.params.format) {
            (CapturedUnit::Hardware { surface, .. }, CaptureFormat::Hardware) => {
                FrameBuffer::from_hardware(surface, timestamp, time_base)
            }
            (CapturedUnit::Hardware { .. }, _) | (CapturedUnit::Raw { .. }, CaptureFormat::Hardware) => {
                return Err(DecodeError::UnexpectedUnit);
            }
            (CapturedUnit::Raw { data, .. }, format) => {
                let image = self.decode_raw(format, data)?;
                FrameBuffer::from_software(image, timestamp, time_base)
            }
        };

        self.decoded += 1;
        Ok(frame)
    }

    fn decode_raw(&self, format: CaptureFormat, mut data: Vec<u8>) -> Result<SoftwareImage, DecodeError> {
        let (width, height) = (self.params.width, self.params.height);
        match format {
            CaptureFormat::Nv12 => {
                // Drivers may report a payload padded past the image
                let size = PixelFormat::Nv12.frame_size(width, height);
                if data.len() > size {
                    data.truncate(size);
                }
                Ok(SoftwareImage::new(PixelFormat::Nv12, width, height, data)?)
            }
            CaptureFormat::Yuyv => Ok(convert::yuyv_to_nv12(&data, width, height)?),
            CaptureFormat::Mjpeg => {
                let rgb = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
                    .map_err(|e| DecodeError::Jpeg(e.to_string()))?
                    .to_rgb8();
                Ok(convert::rgb_to_nv12(&rgb)?)
            }
            CaptureFormat::Hardware => Err(DecodeError::UnexpectedUnit),
        }
    }

    fn synthesized_timestamp(&self) -> i64 {
        let period = self.params.framerate.frame_period();
        Rational::rescale(self.decoded as i64, period, self.params.time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Framerate;

    fn params(format: CaptureFormat) -> StreamParams {
        StreamParams {
            format,
            width: 4,
            height: 2,
            framerate: Framerate::from_int(25),
            time_base: Rational::MICROS,
        }
    }

    #[test]
    fn test_nv12_passthrough_and_synthesized_timestamps() {
        let mut decoder = FrameDecoder::new(params(CaptureFormat::Nv12));
        let unit = || CapturedUnit::Raw {
            data: vec![16; 12],
            timestamp: None,
        };
        let first = decoder.decode(unit()).unwrap();
        let second = decoder.decode(unit()).unwrap();
        assert_eq!(first.pts(), 0);
        assert_eq!(second.pts(), 40_000);
        assert_eq!(second.width(), 4);
    }

    #[test]
    fn test_device_timestamp_wins() {
        let mut decoder = FrameDecoder::new(params(CaptureFormat::Yuyv));
        let frame = decoder
            .decode(CapturedUnit::Raw {
                data: vec![128; 16],
                timestamp: Some(123),
            })
            .unwrap();
        assert_eq!(frame.pts(), 123);
        assert_eq!(frame.software().unwrap().data().len(), 12);
    }

    #[test]
    fn test_short_payload_fails() {
        let mut decoder = FrameDecoder::new(params(CaptureFormat::Nv12));
        let result = decoder.decode(CapturedUnit::Raw {
            data: vec![0; 5],
            timestamp: None,
        });
        assert!(matches!(result, Err(DecodeError::Layout(_))));
    }

    #[test]
    fn test_bad_jpeg_fails() {
        let mut decoder = FrameDecoder::new(params(CaptureFormat::Mjpeg));
        let result = decoder.decode(CapturedUnit::Raw {
            data: vec![0xFF, 0xD8, 0x00],
            timestamp: None,
        });
        assert!(matches!(result, Err(DecodeError::Jpeg(_))));
    }
}
