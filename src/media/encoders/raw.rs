// SPDX-License-Identifier: MPL-2.0

//! Uncompressed "encoder"
//!
//! Emits every frame as one I420 packet. Used when no compressing encoder
//! is available and by tests, where exact output sizes are predictable.

use super::{
    Codec, EncoderFactory, EncoderOutput, EncoderSettings, Packet, StreamInfo, VideoEncoder,
};
use crate::errors::PipelineError;
use crate::media::convert;
use crate::media::frame::{FrameBuffer, PixelFormat};
use std::collections::VecDeque;

#[derive(Debug, Default, Clone, Copy)]
pub struct RawEncoderFactory;

impl EncoderFactory for RawEncoderFactory {
    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, PipelineError> {
        if settings.width == 0 || settings.height == 0 || settings.fps_num == 0 {
            return Err(PipelineError::EncoderOrMuxFailure(format!(
                "invalid raw encoder settings {}x{}@{}/{}",
                settings.width, settings.height, settings.fps_num, settings.fps_den
            )));
        }
        Ok(Box::new(RawVideoEncoder {
            settings: settings.clone(),
            pending: VecDeque::new(),
            flushing: false,
        }))
    }

    fn codec(&self, _settings: &EncoderSettings) -> Codec {
        Codec::RawI420
    }
}

pub struct RawVideoEncoder {
    settings: EncoderSettings,
    pending: VecDeque<Packet>,
    flushing: bool,
}

impl VideoEncoder for RawVideoEncoder {
    fn name(&self) -> &str {
        "rawvideo"
    }

    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            codec: Codec::RawI420,
            width: self.settings.width,
            height: self.settings.height,
            fps_num: self.settings.fps_num,
            fps_den: self.settings.fps_den,
            time_base: self.settings.time_base(),
        }
    }

    fn send_frame(&mut self, frame: Option<&FrameBuffer>) -> Result<(), PipelineError> {
        let Some(frame) = frame else {
            self.flushing = true;
            return Ok(());
        };
        if self.flushing {
            return Err(PipelineError::EncoderOrMuxFailure(
                "frame sent after flush".to_string(),
            ));
        }

        let image = frame.software().ok_or_else(|| {
            PipelineError::EncoderOrMuxFailure("raw encoder needs CPU frames".to_string())
        })?;
        if image.width() != self.settings.width || image.height() != self.settings.height {
            return Err(PipelineError::EncoderOrMuxFailure(format!(
                "frame is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.settings.width,
                self.settings.height
            )));
        }

        let planar = convert::to_format(image, PixelFormat::I420);
        self.pending.push_back(Packet {
            data: planar.into_data(),
            pts: frame.pts(),
            dts: frame.pts(),
            duration: 1,
            keyframe: true,
            time_base: self.settings.time_base(),
        });
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<EncoderOutput, PipelineError> {
        match self.pending.pop_front() {
            Some(packet) => Ok(EncoderOutput::Packet(packet)),
            None if self.flushing => Ok(EncoderOutput::Eof),
            None => Ok(EncoderOutput::Again),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::SoftwareImage;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            width: 8,
            height: 4,
            fps_num: 30,
            fps_den: 1,
            bitrate_kbps: 4000,
            gop_size: 50,
            max_b_frames: 0,
            preferred_encoder: None,
        }
    }

    #[test]
    fn test_one_packet_per_frame_then_eof() {
        let mut encoder = RawEncoderFactory.open(&settings()).unwrap();
        let image = SoftwareImage::blank(PixelFormat::Nv12, 8, 4).unwrap();
        let frame = FrameBuffer::from_software(image, 7, settings().time_base());

        encoder.send_frame(Some(&frame)).unwrap();
        let EncoderOutput::Packet(packet) = encoder.receive_packet().unwrap() else {
            panic!("expected a packet");
        };
        assert_eq!(packet.pts, 7);
        assert_eq!(packet.data.len(), 48);
        assert!(matches!(encoder.receive_packet().unwrap(), EncoderOutput::Again));

        encoder.send_frame(None).unwrap();
        assert!(matches!(encoder.receive_packet().unwrap(), EncoderOutput::Eof));
    }

    #[test]
    fn test_rejects_wrong_size() {
        let mut encoder = RawEncoderFactory.open(&settings()).unwrap();
        let image = SoftwareImage::blank(PixelFormat::Nv12, 16, 4).unwrap();
        let frame = FrameBuffer::from_software(image, 0, settings().time_base());
        assert!(encoder.send_frame(Some(&frame)).is_err());
    }
}
