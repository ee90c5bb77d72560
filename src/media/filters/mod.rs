// SPDX-License-Identifier: MPL-2.0

//! Filter graphs: crop, scale and format normalization
//!
//! A chain is described as a short list of [`FilterStage`] values rather than
//! a textual description. [`plan_chain`] picks the hardware or software shape
//! for the current input, and a [`FilterBackend`] turns the list into a
//! runnable [`FilterGraph`].
//!
//! Hardware chain: `[HwUpload] -> CropScale(hw) -> HwDownload -> NormalizeFormat`
//! Software chain: `[HwDownload] -> CropScale(sw) -> NormalizeFormat`

pub mod software;

#[cfg(feature = "gstreamer")]
pub mod gst;

use super::frame::{FrameBuffer, FrameFormat, PixelFormat};
use super::hw::{HwDevice, HwFramesRef};
use super::timebase::Rational;
use super::zoom::CropRect;
use crate::errors::PipelineError;
use std::sync::Arc;

/// Where a crop/scale stage runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accel {
    Hardware,
    Software,
}

/// One step of a filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    /// Move a software frame into device memory
    HwUpload,
    /// Crop `crop` out of the input and scale it to `width` x `height`
    CropScale {
        crop: CropRect,
        width: u32,
        height: u32,
        accel: Accel,
    },
    /// Bring a device frame back into CPU memory
    HwDownload,
    /// Convert to the given software layout
    NormalizeFormat(PixelFormat),
}

/// Description of the frames a graph will be fed
#[derive(Debug, Clone)]
pub struct FilterInput {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Pool of incoming hardware frames, passed through to avoid re-uploading
    pub hw_frames: Option<HwFramesRef>,
    pub time_base: Rational,
}

impl FilterInput {
    /// Describe an actual frame
    pub fn of(frame: &FrameBuffer) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            hw_frames: frame.hw_frames().cloned(),
            time_base: frame.time_base(),
        }
    }

    /// Whether `frame` can be pushed into a graph built for this input
    pub fn accepts(&self, frame: &FrameBuffer) -> bool {
        let same_pool = match (&self.hw_frames, frame.hw_frames()) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.width == frame.width()
            && self.height == frame.height()
            && self.format == frame.format()
            && same_pool
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self.format, FrameFormat::Hardware { .. })
    }
}

/// Everything a backend needs to build one graph
#[derive(Debug, Clone)]
pub struct FilterGraphConfig {
    pub input: FilterInput,
    pub stages: Vec<FilterStage>,
    pub hw_device: Option<HwDevice>,
    pub output_time_base: Rational,
}

impl FilterGraphConfig {
    /// Plan the chain for `input` and wrap it in a config
    pub fn plan(
        input: FilterInput,
        crop: CropRect,
        out_width: u32,
        out_height: u32,
        hw_device: Option<HwDevice>,
    ) -> Self {
        let stages = plan_chain(&input, crop, out_width, out_height, hw_device.as_ref());
        let output_time_base = input.time_base;
        Self {
            input,
            stages,
            hw_device,
            output_time_base,
        }
    }

    /// The crop this config applies, if any
    pub fn crop(&self) -> Option<CropRect> {
        self.stages.iter().find_map(|stage| match stage {
            FilterStage::CropScale { crop, .. } => Some(*crop),
            _ => None,
        })
    }

    /// Output dimensions of the final crop/scale stage
    pub fn output_size(&self) -> (u32, u32) {
        self.stages
            .iter()
            .find_map(|stage| match stage {
                FilterStage::CropScale { width, height, .. } => Some((*width, *height)),
                _ => None,
            })
            .unwrap_or((self.input.width, self.input.height))
    }

    pub fn uses_hardware(&self) -> bool {
        self.stages.iter().any(|stage| {
            matches!(
                stage,
                FilterStage::CropScale {
                    accel: Accel::Hardware,
                    ..
                }
            )
        })
    }
}

/// Choose the stage list for the given input and capability
pub fn plan_chain(
    input: &FilterInput,
    crop: CropRect,
    out_width: u32,
    out_height: u32,
    hw_device: Option<&HwDevice>,
) -> Vec<FilterStage> {
    let mut stages = Vec::with_capacity(4);

    match hw_device {
        Some(_) => {
            if !input.is_hardware() {
                stages.push(FilterStage::HwUpload);
            }
            stages.push(FilterStage::CropScale {
                crop,
                width: out_width,
                height: out_height,
                accel: Accel::Hardware,
            });
            stages.push(FilterStage::HwDownload);
        }
        None => {
            if input.is_hardware() {
                stages.push(FilterStage::HwDownload);
            }
            stages.push(FilterStage::CropScale {
                crop,
                width: out_width,
                height: out_height,
                accel: Accel::Software,
            });
        }
    }

    stages.push(FilterStage::NormalizeFormat(PixelFormat::Nv12));
    stages
}

/// Result of pulling from a graph
#[derive(Debug)]
pub enum FilterOutput {
    Frame(FrameBuffer),
    /// Nothing ready yet; feed more input
    Again,
    /// End of stream reached and fully drained
    Eof,
}

/// A configured, runnable chain
pub trait FilterGraph: Send {
    fn push(&mut self, frame: FrameBuffer) -> Result<(), PipelineError>;

    /// Signal end of stream; remaining frames become pullable
    fn push_eos(&mut self) -> Result<(), PipelineError>;

    fn pull(&mut self) -> Result<FilterOutput, PipelineError>;

    fn config(&self) -> &FilterGraphConfig;
}

/// Builds filter graphs for one kind of media framework
pub trait FilterBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, config: &FilterGraphConfig) -> Result<Box<dyn FilterGraph>, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::hw::HwDeviceKind;

    fn software_input() -> FilterInput {
        FilterInput {
            width: 2112,
            height: 1568,
            format: FrameFormat::Software(PixelFormat::Nv12),
            hw_frames: None,
            time_base: Rational::MICROS,
        }
    }

    #[test]
    fn test_software_chain_shape() {
        let crop = CropRect::full(2112, 1568);
        let stages = plan_chain(&software_input(), crop, 1280, 720, None);
        assert_eq!(
            stages,
            vec![
                FilterStage::CropScale {
                    crop,
                    width: 1280,
                    height: 720,
                    accel: Accel::Software
                },
                FilterStage::NormalizeFormat(PixelFormat::Nv12),
            ]
        );
    }

    #[test]
    fn test_hardware_chain_uploads_software_input() {
        let device = HwDevice::new(HwDeviceKind::Emulated, "test");
        let crop = CropRect::full(2112, 1568);
        let stages = plan_chain(&software_input(), crop, 1280, 720, Some(&device));
        assert_eq!(stages.first(), Some(&FilterStage::HwUpload));
        assert_eq!(stages[2], FilterStage::HwDownload);
    }

    #[test]
    fn test_hardware_input_skips_upload() {
        let device = HwDevice::new(HwDeviceKind::Emulated, "test");
        let mut input = software_input();
        input.format = FrameFormat::Hardware {
            sw_format: PixelFormat::Nv12,
        };
        let stages = plan_chain(&input, CropRect::full(2112, 1568), 1280, 720, Some(&device));
        assert!(!stages.contains(&FilterStage::HwUpload));
        assert!(matches!(
            stages[0],
            FilterStage::CropScale {
                accel: Accel::Hardware,
                ..
            }
        ));
    }
}
