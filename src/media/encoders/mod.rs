// SPDX-License-Identifier: MPL-2.0

//! Video encoders and output writers
//!
//! An encoder turns filtered frames into [`Packet`]s in its own time base;
//! an [`OutputWriter`] muxes packets into a file or a network stream in the
//! container's time base. Both sides are opened through factories so the
//! pipeline does not care which media framework backs them.

pub mod raw;
pub mod still;
pub mod y4m;

#[cfg(feature = "gstreamer")]
pub mod detection;
#[cfg(feature = "gstreamer")]
pub mod muxer;
#[cfg(feature = "gstreamer")]
pub mod video;

use super::frame::FrameBuffer;
use super::timebase::Rational;
use crate::errors::PipelineError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Codec of an encoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Uncompressed planar I420
    RawI420,
    H264,
    H265,
}

impl Codec {
    /// File extension of the container this codec is written into
    pub fn file_extension(&self) -> &'static str {
        match self {
            Codec::RawI420 => "y4m",
            Codec::H264 | Codec::H265 => "mp4",
        }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    /// Frames per second as num/den
    pub fps_num: u32,
    pub fps_den: u32,
    pub bitrate_kbps: u32,
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// Preferred encoder element, if the backend supports choosing
    pub preferred_encoder: Option<String>,
}

impl EncoderSettings {
    /// Encoder time base: one tick per frame
    pub fn time_base(&self) -> Rational {
        Rational::frame_period(self.fps_num, self.fps_den)
    }
}

/// Stream description handed from encoder to writer
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub time_base: Rational,
}

/// One encoded unit
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub time_base: Rational,
}

impl Packet {
    /// Rescale all timestamps into another time base
    pub fn rescale(&mut self, to: Rational) {
        self.pts = Rational::rescale(self.pts, self.time_base, to);
        self.dts = Rational::rescale(self.dts, self.time_base, to);
        self.duration = Rational::rescale(self.duration, self.time_base, to);
        self.time_base = to;
    }
}

/// Result of draining an encoder
#[derive(Debug)]
pub enum EncoderOutput {
    Packet(Packet),
    /// Feed more frames
    Again,
    /// Flushed completely
    Eof,
}

/// A running video encoder
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    fn stream_info(&self) -> StreamInfo;

    /// Submit a frame already retimed to the encoder time base, or `None` to
    /// start flushing
    fn send_frame(&mut self, frame: Option<&FrameBuffer>) -> Result<(), PipelineError>;

    fn receive_packet(&mut self) -> Result<EncoderOutput, PipelineError>;
}

pub trait EncoderFactory: Send + Sync {
    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, PipelineError>;

    /// Codec this factory will produce for the given settings
    fn codec(&self, settings: &EncoderSettings) -> Codec;
}

/// Where muxed output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    File(PathBuf),
    /// Destination URL (`tcp://host:port`, `rtsp://...`)
    Network(String),
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::File(path) => write!(f, "{}", path.display()),
            OutputTarget::Network(url) => f.write_str(url),
        }
    }
}

/// What a writer produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputSummary {
    pub packets: u64,
    pub bytes: u64,
    pub duration: Duration,
}

/// Container/transport writer
pub trait OutputWriter: Send {
    /// Time base packets must be rescaled to before `write_packet`
    fn time_base(&self) -> Rational;

    fn write_header(&mut self) -> Result<(), PipelineError>;

    fn write_packet(&mut self, packet: Packet) -> Result<(), PipelineError>;

    /// Finish the container and close the output
    fn write_trailer(&mut self) -> Result<OutputSummary, PipelineError>;
}

pub trait WriterFactory: Send + Sync {
    fn open(
        &self,
        target: &OutputTarget,
        stream: &StreamInfo,
    ) -> Result<Box<dyn OutputWriter>, PipelineError>;
}

/// Tracks packet count, byte count and presentation span for a writer
#[derive(Debug, Default)]
pub(crate) struct SpanTracker {
    packets: u64,
    bytes: u64,
    first_pts: Option<i64>,
    end_pts: i64,
}

impl SpanTracker {
    pub(crate) fn record(&mut self, packet: &Packet) {
        self.packets += 1;
        self.bytes += packet.data.len() as u64;
        self.first_pts.get_or_insert(packet.pts);
        let end = packet.pts + packet.duration.max(0);
        self.end_pts = if self.packets == 1 {
            end
        } else {
            self.end_pts.max(end)
        };
    }

    pub(crate) fn summary(&self, time_base: Rational, container_bytes: u64) -> OutputSummary {
        let span = self.first_pts.map(|first| self.end_pts - first).unwrap_or(0);
        OutputSummary {
            packets: self.packets,
            bytes: container_bytes.max(self.bytes),
            duration: time_base.to_duration(span),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pts: i64) -> Packet {
        Packet {
            data: vec![0; 10],
            pts,
            dts: pts,
            duration: 3000,
            keyframe: true,
            time_base: Rational::MPEG,
        }
    }

    #[test]
    fn test_span_covers_last_packet_duration() {
        let mut tracker = SpanTracker::default();
        for k in 0..30 {
            tracker.record(&packet(k * 3000));
        }
        let summary = tracker.summary(Rational::MPEG, 0);
        assert_eq!(summary.packets, 30);
        assert_eq!(summary.bytes, 300);
        assert_eq!(summary.duration, Duration::from_secs(1));
    }

    #[test]
    fn test_packet_rescale() {
        let mut p = Packet {
            data: Vec::new(),
            pts: 3,
            dts: 3,
            duration: 1,
            keyframe: false,
            time_base: Rational::frame_period(30, 1),
        };
        p.rescale(Rational::MPEG);
        assert_eq!((p.pts, p.duration), (9000, 3000));
    }
}
