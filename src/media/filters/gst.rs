// SPDX-License-Identifier: MPL-2.0

//! GStreamer filter backend
//!
//! Software chain: `appsrc ! videocrop ! videoscale ! videoconvert ! capsfilter ! appsink`
//! Hardware chain: `appsrc ! videocrop ! vapostproc ! videoconvert ! capsfilter ! appsink`
//!
//! `vapostproc` uploads, scales and downloads in one element, so the
//! upload/download stages of the plan map onto it. Output frames are copied
//! out of the appsink honoring plane strides.

use super::{Accel, FilterBackend, FilterGraph, FilterGraphConfig, FilterOutput, FilterStage};
use crate::constants::timing::EOS_TIMEOUT_SECS;
use crate::errors::PipelineError;
use crate::media::filters::software::surface_pixels;
use crate::media::frame::{FrameBuffer, PixelFormat, SoftwareImage};
use crate::media::hw::HwDeviceKind;
use crate::media::timebase::Rational;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, warn};

fn fail(msg: String) -> PipelineError {
    PipelineError::FilterGraphBuildFailure(msg)
}

fn make(name: &str) -> Result<gst::Element, PipelineError> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| fail(format!("Failed to create {}: {}", name, e)))
}

/// Filter backend built from GStreamer elements
#[derive(Debug, Default, Clone, Copy)]
pub struct GstFilterBackend;

impl FilterBackend for GstFilterBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn build(&self, config: &FilterGraphConfig) -> Result<Box<dyn FilterGraph>, PipelineError> {
        gst::init().map_err(|e| fail(format!("Failed to initialize GStreamer: {}", e)))?;
        GstFilterGraph::new(config).map(|graph| Box::new(graph) as _)
    }
}

struct GstFilterGraph {
    config: FilterGraphConfig,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    out_info: gst_video::VideoInfo,
    eos: bool,
}

impl GstFilterGraph {
    fn new(config: &FilterGraphConfig) -> Result<Self, PipelineError> {
        let input = &config.input;
        let in_format = match input.format {
            crate::media::frame::FrameFormat::Software(format)
            | crate::media::frame::FrameFormat::Hardware { sw_format: format } => format,
        };

        let in_info = gst_video::VideoInfo::builder(video_format(in_format), input.width, input.height)
            .build()
            .map_err(|e| fail(format!("Invalid input info: {}", e)))?;
        let in_caps = in_info
            .to_caps()
            .map_err(|e| fail(format!("Failed to build input caps: {}", e)))?;
        let appsrc = gst_app::AppSrc::builder()
            .caps(&in_caps)
            .format(gst::Format::Time)
            .build();

        let mut elements: Vec<gst::Element> = vec![appsrc.clone().upcast()];
        let mut normalized = PixelFormat::Nv12;
        for stage in &config.stages {
            match stage {
                FilterStage::HwUpload | FilterStage::HwDownload => {}
                FilterStage::CropScale {
                    crop,
                    width: _,
                    height: _,
                    accel,
                } => {
                    let videocrop = make("videocrop")?;
                    videocrop.set_property("left", crop.x as i32);
                    videocrop.set_property("top", crop.y as i32);
                    videocrop.set_property("right", (input.width - crop.x - crop.width) as i32);
                    videocrop.set_property("bottom", (input.height - crop.y - crop.height) as i32);
                    elements.push(videocrop);

                    match accel {
                        Accel::Hardware => match &config.hw_device {
                            Some(device) if device.kind() == HwDeviceKind::VaApi => {
                                elements.push(make(device.name())?);
                            }
                            _ => {
                                return Err(fail(
                                    "hardware crop/scale requires a VA-API device".to_string(),
                                ));
                            }
                        },
                        Accel::Software => elements.push(make("videoscale")?),
                    }
                }
                FilterStage::NormalizeFormat(format) => {
                    if *format != PixelFormat::Nv12 {
                        return Err(fail(format!("unsupported output format {}", format)));
                    }
                    normalized = *format;
                    elements.push(make("videoconvert")?);
                }
            }
        }

        let (out_width, out_height) = config.output_size();
        let out_info = gst_video::VideoInfo::builder(video_format(normalized), out_width, out_height)
            .build()
            .map_err(|e| fail(format!("Invalid output info: {}", e)))?;
        let out_caps = out_info
            .to_caps()
            .map_err(|e| fail(format!("Failed to build output caps: {}", e)))?;
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &out_caps)
            .build()
            .map_err(|e| fail(format!("Failed to create capsfilter: {}", e)))?;
        elements.push(capsfilter);

        let appsink = gst_app::AppSink::builder().sync(false).build();
        elements.push(appsink.clone().upcast());

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many(&elements)
            .map_err(|e| fail(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(&elements)
            .map_err(|e| fail(format!("Failed to link filter chain: {}", e)))?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| fail(format!("Failed to start filter chain: {}", e)))?;

        debug!(
            stages = ?config.stages,
            output_w = out_width,
            output_h = out_height,
            "Built GStreamer filter graph"
        );

        Ok(Self {
            config: config.clone(),
            pipeline,
            appsrc,
            appsink,
            out_info,
            eos: false,
        })
    }

    fn frame_from(&self, sample: gst::Sample) -> Result<FrameBuffer, PipelineError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| fail("Filter sample without buffer".to_string()))?;
        let pts_ns = buffer.pts().map(|t| t.nseconds() as i64).unwrap_or(0);

        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &self.out_info)
            .map_err(|e| fail(format!("Failed to map filtered frame: {}", e)))?;
        let width = self.out_info.width() as usize;
        let height = self.out_info.height() as usize;

        // NV12: full-size luma rows, then half-height rows of interleaved UV
        let mut data = Vec::with_capacity(width * height * 3 / 2);
        for (plane, rows) in [(0u32, height), (1u32, height / 2)] {
            let stride = frame.plane_stride()[plane as usize] as usize;
            let src = frame
                .plane_data(plane)
                .map_err(|e| fail(format!("Missing plane {}: {}", plane, e)))?;
            for row in 0..rows {
                data.extend_from_slice(&src[row * stride..row * stride + width]);
            }
        }

        let image = SoftwareImage::new(
            PixelFormat::Nv12,
            self.out_info.width(),
            self.out_info.height(),
            data,
        )
        .map_err(|e| fail(e.to_string()))?;
        let pts = Rational::rescale(pts_ns, Rational::NANOS, self.config.output_time_base);
        Ok(FrameBuffer::from_software(image, pts, self.config.output_time_base))
    }
}

fn video_format(format: PixelFormat) -> gst_video::VideoFormat {
    match format {
        PixelFormat::Nv12 => gst_video::VideoFormat::Nv12,
        PixelFormat::I420 => gst_video::VideoFormat::I420,
    }
}

impl FilterGraph for GstFilterGraph {
    fn push(&mut self, frame: FrameBuffer) -> Result<(), PipelineError> {
        if self.eos {
            return Err(fail("frame pushed after end of stream".to_string()));
        }

        let pixels = match (frame.software(), frame.hardware()) {
            (Some(image), _) => image.data().to_vec(),
            (None, Some(surface)) => surface_pixels(surface)?.data().to_vec(),
            (None, None) => return Err(fail("frame without storage".to_string())),
        };
        let pts = Rational::rescale(frame.pts(), frame.time_base(), Rational::NANOS).max(0);

        let mut buffer = gst::Buffer::from_slice(pixels);
        buffer
            .get_mut()
            .ok_or_else(|| fail("Buffer not writable".to_string()))?
            .set_pts(gst::ClockTime::from_nseconds(pts as u64));

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| fail(format!("Failed to push frame: {:?}", e)))?;
        Ok(())
    }

    fn push_eos(&mut self) -> Result<(), PipelineError> {
        if !self.eos {
            self.eos = true;
            self.appsrc
                .end_of_stream()
                .map_err(|e| fail(format!("Failed to send EOS: {:?}", e)))?;
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<FilterOutput, PipelineError> {
        let timeout = if self.eos {
            gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)
        } else {
            gst::ClockTime::ZERO
        };

        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => self.frame_from(sample).map(FilterOutput::Frame),
            None if self.appsink.is_eos() => Ok(FilterOutput::Eof),
            None if self.eos => Err(fail(format!(
                "filter chain did not drain within {}s",
                EOS_TIMEOUT_SECS
            ))),
            None => Ok(FilterOutput::Again),
        }
    }

    fn config(&self) -> &FilterGraphConfig {
        &self.config
    }
}

impl Drop for GstFilterGraph {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = ?e, "Failed to stop filter pipeline");
        }
    }
}
