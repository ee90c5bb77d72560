// SPDX-License-Identifier: MPL-2.0

//! GStreamer output writers
//!
//! Encoded access units enter through an appsrc and leave through either
//! `mp4mux ! filesink` for recordings or `rtspclientsink` (TCP interleaved)
//! for streams. Packets arrive in nanosecond ticks so buffer timestamps can
//! be set directly.

use super::{
    Codec, OutputSummary, OutputTarget, OutputWriter, Packet, SpanTracker, StreamInfo,
    WriterFactory,
};
use crate::constants::timing::EOS_TIMEOUT_SECS;
use crate::errors::PipelineError;
use crate::media::timebase::Rational;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info, warn};

/// Writer factory for MP4 files and RTSP publishing
#[derive(Debug, Clone)]
pub struct GstWriterFactory {
    /// RTSP lower transport ("tcp" or "udp")
    pub transport: String,
}

impl Default for GstWriterFactory {
    fn default() -> Self {
        Self {
            transport: "tcp".to_string(),
        }
    }
}

impl WriterFactory for GstWriterFactory {
    fn open(
        &self,
        target: &OutputTarget,
        stream: &StreamInfo,
    ) -> Result<Box<dyn OutputWriter>, PipelineError> {
        gst::init().map_err(|e| fail(format!("Failed to initialize GStreamer: {}", e)))?;
        GstOutputWriter::new(target, stream, &self.transport).map(|w| Box::new(w) as _)
    }
}

fn fail(msg: String) -> PipelineError {
    PipelineError::EncoderOrMuxFailure(msg)
}

fn make(name: &str) -> Result<gst::Element, PipelineError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| fail(format!("Failed to create {}: {}", name, e)))
}

/// appsrc-fed muxing pipeline
pub struct GstOutputWriter {
    target: OutputTarget,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    span: SpanTracker,
    started: bool,
}

impl GstOutputWriter {
    fn new(target: &OutputTarget, stream: &StreamInfo, transport: &str) -> Result<Self, PipelineError> {
        if stream.codec == Codec::RawI420 {
            return Err(fail("Raw video cannot be muxed by the GStreamer writer".to_string()));
        }

        let caps = stream
            .codec
            .stream_caps()
            .and_then(|caps| caps.parse::<gst::Caps>().ok())
            .ok_or_else(|| fail(format!("No stream caps for {:?}", stream.codec)))?;
        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(matches!(target, OutputTarget::Network(_)))
            .build();
        let parser = make(stream.codec.parser_name().unwrap_or("identity"))?;

        let mut elements: Vec<gst::Element> = vec![appsrc.clone().upcast(), parser];
        match target {
            OutputTarget::File(path) => {
                elements.push(make("mp4mux")?);
                let sink = make("filesink")?;
                sink.set_property("location", path.to_string_lossy().to_string());
                elements.push(sink);
            }
            OutputTarget::Network(url) => {
                let sink = make("rtspclientsink")?;
                sink.set_property("location", url.as_str());
                if sink.find_property("protocols").is_some() {
                    sink.set_property_from_str("protocols", transport);
                }
                elements.push(sink);
            }
        }

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many(&elements)
            .map_err(|e| fail(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(&elements)
            .map_err(|e| fail(format!("Failed to link output pipeline: {}", e)))?;

        debug!(target = %target, codec = ?stream.codec, "Output pipeline created");

        Ok(Self {
            target: target.clone(),
            pipeline,
            appsrc,
            span: SpanTracker::default(),
            started: false,
        })
    }

    /// Wait for EOS or an error on the bus
    fn wait_for_eos(&self) -> Result<(), PipelineError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| fail("Pipeline without bus".to_string()))?;

        for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
            use gst::MessageView;
            match msg.view() {
                MessageView::Eos(..) => return Ok(()),
                MessageView::Error(err) => {
                    return Err(fail(format!(
                        "{} (debug: {:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                _ => {}
            }
        }

        Err(fail(format!(
            "Output did not finish within {}s",
            EOS_TIMEOUT_SECS
        )))
    }

    /// First error already posted on the bus, if any
    fn pending_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(err.error().to_string()),
            _ => None,
        }
    }
}

impl OutputWriter for GstOutputWriter {
    fn time_base(&self) -> Rational {
        Rational::NANOS
    }

    fn write_header(&mut self) -> Result<(), PipelineError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| fail(format!("Failed to start output {}: {}", self.target, e)))?;
        self.started = true;
        info!(target = %self.target, "Output started");
        Ok(())
    }

    fn write_packet(&mut self, packet: Packet) -> Result<(), PipelineError> {
        if let Some(error) = self.pending_error() {
            return Err(fail(error));
        }

        self.span.record(&packet);
        let keyframe = packet.keyframe;
        let pts = packet.pts.max(0) as u64;
        let dts = packet.dts.max(0) as u64;
        let duration = packet.duration.max(0) as u64;

        let mut buffer = gst::Buffer::from_slice(packet.data);
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| fail("Buffer not writable".to_string()))?;
            buffer.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer.set_dts(gst::ClockTime::from_nseconds(dts));
            buffer.set_duration(gst::ClockTime::from_nseconds(duration));
            if !keyframe {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| fail(format!("Failed to push packet to {}: {:?}", self.target, e)))?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<OutputSummary, PipelineError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| fail(format!("Failed to send EOS: {:?}", e)))?;
        let result = self.wait_for_eos();
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| fail(format!("Failed to stop output: {}", e)))?;
        self.started = false;
        result?;

        let container_bytes = match &self.target {
            OutputTarget::File(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            OutputTarget::Network(_) => 0,
        };
        Ok(self.span.summary(Rational::NANOS, container_bytes))
    }
}

impl Drop for GstOutputWriter {
    fn drop(&mut self) {
        if self.started
            && let Err(e) = self.pipeline.set_state(gst::State::Null)
        {
            warn!(target = %self.target, error = ?e, "Failed to stop output pipeline");
        }
    }
}
