// SPDX-License-Identifier: MPL-2.0

//! CPU filter backend
//!
//! Runs every stage on CPU-addressable memory. Hardware stages are accepted
//! only for an emulated device, where upload/download are plain moves between
//! storage kinds and the "hardware" crop/scale is the same CPU kernel. This
//! keeps the hardware chain shape testable without a GPU or ISP.

use super::{Accel, FilterBackend, FilterGraph, FilterGraphConfig, FilterOutput, FilterStage};
use crate::errors::PipelineError;
use crate::media::convert;
use crate::media::frame::{FrameBuffer, SoftwareImage};
use crate::media::hw::{HardwareSurface, HwDeviceKind, HwFrames, HwFramesRef, SurfaceMemory};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Filter backend that needs nothing but the CPU
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareFilterBackend;

impl FilterBackend for SoftwareFilterBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn build(&self, config: &FilterGraphConfig) -> Result<Box<dyn FilterGraph>, PipelineError> {
        validate(config)?;

        debug!(
            input_w = config.input.width,
            input_h = config.input.height,
            stages = ?config.stages,
            "Built software filter graph"
        );

        Ok(Box::new(SoftwareFilterGraph {
            config: config.clone(),
            ready: VecDeque::new(),
            eos: false,
            pools: Vec::new(),
        }))
    }
}

fn validate(config: &FilterGraphConfig) -> Result<(), PipelineError> {
    let fail = |msg: String| Err(PipelineError::FilterGraphBuildFailure(msg));

    let needs_device = config.stages.iter().any(|stage| {
        matches!(
            stage,
            FilterStage::HwUpload
                | FilterStage::CropScale {
                    accel: Accel::Hardware,
                    ..
                }
        )
    });
    if needs_device {
        match &config.hw_device {
            Some(device) if device.kind() == HwDeviceKind::Emulated => {}
            Some(device) => {
                return fail(format!(
                    "software backend cannot drive {} device '{}'",
                    device.kind(),
                    device.name()
                ));
            }
            None => return fail("hardware stage without a device".to_string()),
        }
    }

    for stage in &config.stages {
        if let FilterStage::CropScale {
            crop,
            width,
            height,
            ..
        } = stage
        {
            if !crop.fits(config.input.width, config.input.height) {
                return fail(format!(
                    "crop {:?} outside {}x{} input",
                    crop, config.input.width, config.input.height
                ));
            }
            if *width == 0 || *height == 0 || width % 2 != 0 || height % 2 != 0 {
                return fail(format!("invalid output size {}x{}", width, height));
            }
        }
    }

    Ok(())
}

enum Working<'a> {
    Cpu(Cow<'a, SoftwareImage>),
    Device {
        frames: HwFramesRef,
        image: Cow<'a, SoftwareImage>,
    },
}

struct SoftwareFilterGraph {
    config: FilterGraphConfig,
    ready: VecDeque<FrameBuffer>,
    eos: bool,
    pools: Vec<HwFramesRef>,
}

impl SoftwareFilterGraph {
    /// Frame pool for emulated surfaces of the given size
    fn pool(&mut self, image: &SoftwareImage) -> Result<HwFramesRef, PipelineError> {
        if let Some(pool) = self
            .pools
            .iter()
            .find(|p| p.width == image.width() && p.height == image.height())
        {
            return Ok(Arc::clone(pool));
        }

        let device = self.config.hw_device.clone().ok_or_else(|| {
            PipelineError::FilterGraphBuildFailure("upload without a device".to_string())
        })?;
        let pool = Arc::new(HwFrames {
            device,
            sw_format: image.format(),
            width: image.width(),
            height: image.height(),
        });
        self.pools.push(Arc::clone(&pool));
        Ok(pool)
    }

    fn process<'a>(&mut self, frame: &'a FrameBuffer) -> Result<Working<'a>, PipelineError> {
        let mut working = if let Some(image) = frame.software() {
            Working::Cpu(Cow::Borrowed(image))
        } else if let Some(surface) = frame.hardware() {
            Working::Device {
                frames: Arc::clone(&surface.frames),
                image: surface_pixels(surface)?,
            }
        } else {
            return Err(PipelineError::FilterGraphBuildFailure(
                "frame without storage".to_string(),
            ));
        };

        for stage in self.config.stages.clone() {
            working = match (stage, working) {
                (FilterStage::HwUpload, Working::Cpu(image)) => {
                    let frames = self.pool(&image)?;
                    Working::Device { frames, image }
                }
                (FilterStage::HwDownload, Working::Device { image, .. }) => Working::Cpu(image),
                (
                    FilterStage::CropScale {
                        crop,
                        width,
                        height,
                        accel,
                    },
                    current,
                ) => {
                    let (source, on_device) = match (&current, accel) {
                        (Working::Cpu(image), Accel::Software) => (image.as_ref(), false),
                        (Working::Device { image, .. }, Accel::Hardware) => (image.as_ref(), true),
                        _ => {
                            return Err(PipelineError::FilterGraphBuildFailure(format!(
                                "{:?} crop/scale fed from the wrong memory",
                                accel
                            )));
                        }
                    };
                    let scaled = convert::crop_scale_nv12(source, crop, width, height)
                        .map_err(|e| PipelineError::FilterGraphBuildFailure(e.to_string()))?;
                    if on_device {
                        let frames = self.pool(&scaled)?;
                        Working::Device {
                            frames,
                            image: Cow::Owned(scaled),
                        }
                    } else {
                        Working::Cpu(Cow::Owned(scaled))
                    }
                }
                (FilterStage::NormalizeFormat(format), Working::Cpu(image)) => {
                    if image.format() == format {
                        Working::Cpu(image)
                    } else {
                        Working::Cpu(Cow::Owned(convert::to_format(&image, format)))
                    }
                }
                (stage, _) => {
                    return Err(PipelineError::FilterGraphBuildFailure(format!(
                        "stage {:?} received frame in the wrong memory",
                        stage
                    )));
                }
            };
        }

        Ok(working)
    }
}

/// CPU view of a surface's pixels
pub(crate) fn surface_pixels(surface: &HardwareSurface) -> Result<Cow<'_, SoftwareImage>, PipelineError> {
    match &surface.memory {
        SurfaceMemory::Emulated(image) => Ok(Cow::Borrowed(image)),
        SurfaceMemory::DmaBuf { fd, size } => {
            let data = read_dmabuf(fd, *size).map_err(PipelineError::FilterGraphBuildFailure)?;
            SoftwareImage::new(surface.frames.sw_format, surface.width(), surface.height(), data)
                .map(Cow::Owned)
                .map_err(|e| PipelineError::FilterGraphBuildFailure(e.to_string()))
        }
    }
}

/// Copy a DMA-buf's contents into CPU memory
fn read_dmabuf(fd: &std::os::fd::OwnedFd, size: usize) -> Result<Vec<u8>, String> {
    use std::os::fd::AsRawFd;

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(format!(
            "Failed to mmap DMA-buf: {}",
            std::io::Error::last_os_error()
        ));
    }

    let mut data = vec![0u8; size];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr as *const u8, data.as_mut_ptr(), size);
        libc::munmap(ptr, size);
    }
    Ok(data)
}

impl FilterGraph for SoftwareFilterGraph {
    fn push(&mut self, frame: FrameBuffer) -> Result<(), PipelineError> {
        if self.eos {
            return Err(PipelineError::FilterGraphBuildFailure(
                "frame pushed after end of stream".to_string(),
            ));
        }

        let pts = frame.pts();
        let time_base = frame.time_base();
        let output = match self.process(&frame)? {
            Working::Cpu(image) => FrameBuffer::from_software(image.into_owned(), pts, time_base),
            Working::Device { frames, image } => FrameBuffer::from_hardware(
                HardwareSurface {
                    frames,
                    memory: SurfaceMemory::Emulated(image.into_owned()),
                },
                pts,
                time_base,
            ),
        };

        let mut output = output;
        output.retime(self.config.output_time_base);
        self.ready.push_back(output);
        Ok(())
    }

    fn push_eos(&mut self) -> Result<(), PipelineError> {
        self.eos = true;
        Ok(())
    }

    fn pull(&mut self) -> Result<FilterOutput, PipelineError> {
        match self.ready.pop_front() {
            Some(frame) => Ok(FilterOutput::Frame(frame)),
            None if self.eos => Ok(FilterOutput::Eof),
            None => Ok(FilterOutput::Again),
        }
    }

    fn config(&self) -> &FilterGraphConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::filters::FilterInput;
    use crate::media::frame::PixelFormat;
    use crate::media::hw::HwDevice;
    use crate::media::timebase::Rational;
    use crate::media::zoom::CropRect;

    fn frame(width: u32, height: u32) -> FrameBuffer {
        let image = SoftwareImage::blank(PixelFormat::Nv12, width, height).unwrap();
        FrameBuffer::from_software(image, 33_333, Rational::MICROS)
    }

    fn build(hw: Option<HwDevice>, crop: CropRect) -> Result<Box<dyn FilterGraph>, PipelineError> {
        let input = FilterInput::of(&frame(64, 48));
        let config = FilterGraphConfig::plan(input, crop, 32, 18, hw);
        SoftwareFilterBackend.build(&config)
    }

    #[test]
    fn test_software_chain_produces_scaled_nv12() {
        let mut graph = build(None, CropRect::full(64, 48)).unwrap();
        assert!(matches!(graph.pull().unwrap(), FilterOutput::Again));

        let input = frame(64, 48);
        graph.push(input.clone()).unwrap();
        let FilterOutput::Frame(out) = graph.pull().unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!((out.width(), out.height()), (32, 18));
        assert_eq!(out.pts(), 33_333);
        assert!(!out.shares_storage_with(&input));
        assert!(matches!(graph.pull().unwrap(), FilterOutput::Again));
    }

    #[test]
    fn test_emulated_hardware_chain_downloads_result() {
        let device = HwDevice::new(HwDeviceKind::Emulated, "test");
        let mut graph = build(Some(device), CropRect::for_level(64, 48, 20)).unwrap();
        assert!(graph.config().uses_hardware());

        graph.push(frame(64, 48)).unwrap();
        let FilterOutput::Frame(out) = graph.pull().unwrap() else {
            panic!("expected a frame");
        };
        assert!(!out.is_hardware());
        assert_eq!(out.width(), 32);
    }

    #[test]
    fn test_eos_drains_then_reports_eof() {
        let mut graph = build(None, CropRect::full(64, 48)).unwrap();
        graph.push(frame(64, 48)).unwrap();
        graph.push_eos().unwrap();
        assert!(matches!(graph.pull().unwrap(), FilterOutput::Frame(_)));
        assert!(matches!(graph.pull().unwrap(), FilterOutput::Eof));
    }

    #[test]
    fn test_rejects_crop_outside_input() {
        let crop = CropRect {
            x: 40,
            y: 0,
            width: 40,
            height: 48,
        };
        assert!(matches!(
            build(None, crop),
            Err(PipelineError::FilterGraphBuildFailure(_))
        ));
    }

    #[test]
    fn test_rejects_real_device() {
        let device = HwDevice::new(HwDeviceKind::VaApi, "renderD128");
        assert!(build(Some(device), CropRect::full(64, 48)).is_err());
    }
}
