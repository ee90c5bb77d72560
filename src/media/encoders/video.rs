// SPDX-License-Identifier: MPL-2.0

//! GStreamer video encoder with hardware acceleration priority
//!
//! Encoders are tried in order: hardware HEVC, hardware H.264, then the
//! software fallbacks. Each candidate runs inside a small pipeline:
//!
//! `appsrc (NV12) ! videoconvert ! <encoder> ! <parser> ! appsink`
//!
//! and the appsink hands out byte-stream access units as [`Packet`]s.

use super::detection::{ENCODER_CANDIDATES, EncoderCandidate, has_element};
use super::{
    Codec, EncoderFactory, EncoderOutput, EncoderSettings, Packet, StreamInfo, VideoEncoder,
};
use crate::constants::timing::EOS_TIMEOUT_SECS;
use crate::errors::PipelineError;
use crate::media::frame::FrameBuffer;
use crate::media::timebase::Rational;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

impl Codec {
    /// Parser element that emits aligned access units
    pub fn parser_name(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("h264parse"),
            Codec::H265 => Some("h265parse"),
            Codec::RawI420 => None,
        }
    }

    /// Caps of the byte-stream the encoder pipeline produces
    pub fn stream_caps(&self) -> Option<&'static str> {
        match self {
            Codec::H264 => Some("video/x-h264,stream-format=byte-stream,alignment=au"),
            Codec::H265 => Some("video/x-h265,stream-format=byte-stream,alignment=au"),
            Codec::RawI420 => None,
        }
    }
}

/// Encoder factory picking the best installed GStreamer encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct GstEncoderFactory;

impl GstEncoderFactory {
    /// First installed candidate, honoring a preferred element name
    fn select(settings: &EncoderSettings) -> Option<EncoderCandidate> {
        if let Some(preferred) = &settings.preferred_encoder {
            match ENCODER_CANDIDATES.iter().find(|c| c.element == preferred.as_str()) {
                Some(candidate) if has_element(candidate.element) => return Some(*candidate),
                _ => warn!(encoder = %preferred, "Preferred encoder unavailable, using priority list"),
            }
        }

        ENCODER_CANDIDATES
            .into_iter()
            .find(|c| has_element(c.element))
    }
}

impl EncoderFactory for GstEncoderFactory {
    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, PipelineError> {
        let EncoderCandidate {
            element: name,
            codec,
            hardware: is_hardware,
        } = Self::select(settings).ok_or_else(|| {
            PipelineError::EncoderOrMuxFailure(
                "No video encoder available. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264"
                    .to_string(),
            )
        })?;

        info!(
            encoder = %name,
            codec = ?codec,
            hardware = is_hardware,
            "Selected video encoder"
        );

        GstVideoEncoder::new(name, codec, settings).map(|encoder| Box::new(encoder) as _)
    }

    fn codec(&self, settings: &EncoderSettings) -> Codec {
        Self::select(settings)
            .map(|c| c.codec)
            .unwrap_or(Codec::H264)
    }
}

/// Encoder pipeline fed through an appsrc
pub struct GstVideoEncoder {
    name: String,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    info: StreamInfo,
    eos_sent: bool,
}

impl GstVideoEncoder {
    fn new(name: &str, codec: Codec, settings: &EncoderSettings) -> Result<Self, PipelineError> {
        let fail = |msg: String| PipelineError::EncoderOrMuxFailure(msg);

        let video_info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Nv12,
            settings.width,
            settings.height,
        )
        .fps(gst::Fraction::new(
            settings.fps_num as i32,
            settings.fps_den as i32,
        ))
        .build()
        .map_err(|e| fail(format!("Invalid video info: {}", e)))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| fail(format!("Failed to build caps: {}", e)))?;

        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .build();
        let convert = make_element("videoconvert")?;
        let encoder = make_element(name)?;
        configure_video_encoder(&encoder, name, settings);
        let parser = make_element(codec.parser_name().unwrap_or("identity"))?;
        let out_caps = codec
            .stream_caps()
            .and_then(|caps| caps.parse::<gst::Caps>().ok())
            .ok_or_else(|| fail(format!("No stream caps for {:?}", codec)))?;
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &out_caps)
            .build()
            .map_err(|e| fail(format!("Failed to create capsfilter: {}", e)))?;
        let appsink = gst_app::AppSink::builder().sync(false).build();

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &convert,
                &encoder,
                &parser,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| fail(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &convert,
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| fail(format!("Failed to link encoder pipeline: {}", e)))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| fail(format!("Failed to start encoder {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            pipeline,
            appsrc,
            appsink,
            info: StreamInfo {
                codec,
                width: settings.width,
                height: settings.height,
                fps_num: settings.fps_num,
                fps_den: settings.fps_den,
                time_base: settings.time_base(),
            },
            eos_sent: false,
        })
    }

    fn packet_from(&self, sample: gst::Sample) -> Result<Packet, PipelineError> {
        let buffer = sample.buffer().ok_or_else(|| {
            PipelineError::EncoderOrMuxFailure("Encoder sample without buffer".to_string())
        })?;
        let map = buffer
            .map_readable()
            .map_err(|e| PipelineError::EncoderOrMuxFailure(format!("Failed to map buffer: {}", e)))?;

        let to_ticks = |time: Option<gst::ClockTime>| {
            time.map(|t| Rational::rescale(t.nseconds() as i64, Rational::NANOS, self.info.time_base))
        };
        let pts = to_ticks(buffer.pts()).unwrap_or(0);
        let dts = to_ticks(buffer.dts()).unwrap_or(pts);
        let duration = to_ticks(buffer.duration()).unwrap_or(1);

        Ok(Packet {
            data: map.as_slice().to_vec(),
            pts,
            dts,
            duration,
            keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
            time_base: self.info.time_base,
        })
    }
}

impl VideoEncoder for GstVideoEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream_info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn send_frame(&mut self, frame: Option<&FrameBuffer>) -> Result<(), PipelineError> {
        let Some(frame) = frame else {
            if !self.eos_sent {
                self.eos_sent = true;
                self.appsrc.end_of_stream().map_err(|e| {
                    PipelineError::EncoderOrMuxFailure(format!("Failed to send EOS: {:?}", e))
                })?;
            }
            return Ok(());
        };

        let image = frame.software().ok_or_else(|| {
            PipelineError::EncoderOrMuxFailure("Encoder needs frames in CPU memory".to_string())
        })?;

        let mut buffer = gst::Buffer::from_slice(image.data().to_vec());
        {
            let time_base = self.info.time_base;
            let pts = Rational::rescale(frame.pts(), time_base, Rational::NANOS).max(0);
            let duration = Rational::rescale(1, time_base, Rational::NANOS);
            let buffer = buffer.get_mut().ok_or_else(|| {
                PipelineError::EncoderOrMuxFailure("Buffer not writable".to_string())
            })?;
            buffer.set_pts(gst::ClockTime::from_nseconds(pts as u64));
            buffer.set_duration(gst::ClockTime::from_nseconds(duration as u64));
        }

        self.appsrc.push_buffer(buffer).map_err(|e| {
            PipelineError::EncoderOrMuxFailure(format!("Failed to push frame to {}: {:?}", self.name, e))
        })?;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<EncoderOutput, PipelineError> {
        let timeout = if self.eos_sent {
            gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)
        } else {
            gst::ClockTime::ZERO
        };

        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => self.packet_from(sample).map(EncoderOutput::Packet),
            None if self.appsink.is_eos() => Ok(EncoderOutput::Eof),
            None if self.eos_sent => Err(PipelineError::EncoderOrMuxFailure(format!(
                "{} did not drain within {}s",
                self.name, EOS_TIMEOUT_SECS
            ))),
            None => Ok(EncoderOutput::Again),
        }
    }
}

impl Drop for GstVideoEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(encoder = %self.name, error = ?e, "Failed to stop encoder pipeline");
        }
    }
}

fn make_element(name: &str) -> Result<gst::Element, PipelineError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| PipelineError::EncoderOrMuxFailure(format!("Failed to create {}: {}", name, e)))
}

/// Set a property only if the element exposes it, parsing from a string so
/// integer widths and enums match whatever the plugin declares
fn set_if_present(element: &gst::Element, property: &str, value: &str) {
    if element.find_property(property).is_some() {
        element.set_property_from_str(property, value);
    } else {
        debug!(property, "Encoder has no such property");
    }
}

/// Configure encoder based on type: bitrate, keyframe interval and B-frames
fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, settings: &EncoderSettings) {
    let bitrate = settings.bitrate_kbps.to_string();
    let gop = settings.gop_size.to_string();
    let bframes = settings.max_b_frames.to_string();

    match encoder_name {
        // x264 software encoder
        "x264enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &bitrate);
            set_if_present(encoder, "key-int-max", &gop);
            set_if_present(encoder, "bframes", &bframes);
        }

        // x265 software encoder
        "x265enc" => {
            set_if_present(encoder, "speed-preset", "veryfast");
            set_if_present(encoder, "tune", "zerolatency");
            set_if_present(encoder, "bitrate", &bitrate);
            set_if_present(encoder, "key-int-max", &gop);
        }

        // VA-API encoders (old plugin style)
        "vaapih264enc" | "vaapih265enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &bitrate);
            set_if_present(encoder, "keyframe-period", &gop);
            set_if_present(encoder, "max-bframes", &bframes);
        }

        // VA-API encoders (new plugin style)
        "vah264enc" | "vah265enc" => {
            set_if_present(encoder, "rate-control", "cbr");
            set_if_present(encoder, "bitrate", &bitrate);
            set_if_present(encoder, "key-int-max", &gop);
            set_if_present(encoder, "b-frames", &bframes);
        }

        // NVIDIA encoders
        "nvh264enc" | "nvh265enc" => {
            set_if_present(encoder, "bitrate", &bitrate);
            set_if_present(encoder, "rc-mode", "cbr");
            set_if_present(encoder, "gop-size", &gop);
            set_if_present(encoder, "bframes", &bframes);
        }

        // V4L2 hardware encoders
        "v4l2h264enc" | "v4l2h265enc" => {
            // V4L2 encoders typically have limited configuration
            debug!("Using V4L2 encoder with default configuration");
        }

        // OpenH264 (software H.264 encoder)
        "openh264enc" => {
            set_if_present(encoder, "rate-control", "bitrate");
            // Bits per second
            set_if_present(encoder, "bitrate", &(settings.bitrate_kbps * 1000).to_string());
            set_if_present(encoder, "gop-size", &gop);
            set_if_present(encoder, "usage-type", "camera");
        }

        _ => {
            debug!("Unknown encoder type, using default configuration");
        }
    }

    debug!(
        encoder = encoder_name,
        bitrate_kbps = settings.bitrate_kbps,
        gop = settings.gop_size,
        b_frames = settings.max_b_frames,
        "Configured video encoder"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsers() {
        assert_eq!(Codec::H264.parser_name(), Some("h264parse"));
        assert_eq!(Codec::H265.parser_name(), Some("h265parse"));
        assert_eq!(Codec::RawI420.parser_name(), None);
    }
}
