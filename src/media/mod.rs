// SPDX-License-Identifier: MPL-2.0

//! Media processing: frames, filter graphs, encoders and writers
//!
//! # Frames
//!
//! [`frame::FrameBuffer`] is a reference-counted handle over NV12/I420
//! pixels or a hardware surface. Capture fan-out and pipeline stages pass
//! handles, never pixel copies; writes go through copy-on-write.
//!
//! # Processing
//!
//! - [`filters`]: crop/scale/format chains (hardware or software shape)
//! - [`encoders`]: video encoders, still encoders and output writers
//! - [`zoom`]: digital zoom level to crop rectangle
//! - [`osd`]: timestamp and telemetry overlay
//!
//! # Backends
//!
//! A [`MediaBackend`] bundles one filter backend, one encoder factory and
//! one writer factory. The software backend is always available; the
//! GStreamer backend is compiled with the `gstreamer` feature.

pub mod convert;
pub mod encoders;
pub mod filters;
pub mod frame;
pub mod hw;
pub mod osd;
pub mod queue;
pub mod timebase;
pub mod zoom;

use crate::config::{BackendKind, Config};
use encoders::{EncoderFactory, WriterFactory};
use filters::FilterBackend;
use hw::HwAccel;
use std::sync::Arc;
use tracing::info;

// Re-export commonly used types
pub use frame::{FrameBuffer, PixelFormat, SoftwareImage};
pub use queue::FrameQueue;
pub use timebase::Rational;
pub use zoom::{CropRect, ZoomController};

/// Filter, encoder and writer implementations used together
#[derive(Clone)]
pub struct MediaBackend {
    pub filters: Arc<dyn FilterBackend>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub writers: Arc<dyn WriterFactory>,
    /// Acceleration source handed to the capture engine
    pub hw_accel: Option<Arc<dyn HwAccel>>,
}

impl MediaBackend {
    /// CPU filters, raw I420 encoder and Y4M/TCP writer
    pub fn software() -> Self {
        Self {
            filters: Arc::new(filters::software::SoftwareFilterBackend),
            encoders: Arc::new(encoders::raw::RawEncoderFactory),
            writers: Arc::new(encoders::y4m::Y4mWriterFactory),
            hw_accel: None,
        }
    }

    /// GStreamer filters, H.265/H.264 encoders and MP4/RTSP writers
    #[cfg(feature = "gstreamer")]
    pub fn gstreamer(config: &Config) -> Self {
        encoders::detection::log_available_encoders();
        Self {
            filters: Arc::new(filters::gst::GstFilterBackend),
            encoders: Arc::new(encoders::video::GstEncoderFactory),
            writers: Arc::new(encoders::muxer::GstWriterFactory {
                transport: config.stream.transport.clone(),
            }),
            hw_accel: Some(Arc::new(encoders::detection::VaapiHwAccel)),
        }
    }

    /// Backend selected by the configuration
    pub fn for_config(config: &Config) -> Self {
        match config.encoder.backend {
            BackendKind::Software => {
                info!("Using software media backend");
                Self::software()
            }
            #[cfg(feature = "gstreamer")]
            BackendKind::Gstreamer | BackendKind::Auto => {
                info!("Using GStreamer media backend");
                Self::gstreamer(config)
            }
            #[cfg(not(feature = "gstreamer"))]
            BackendKind::Gstreamer => {
                tracing::warn!("Built without GStreamer support, falling back to software backend");
                Self::software()
            }
            #[cfg(not(feature = "gstreamer"))]
            BackendKind::Auto => Self::software(),
        }
    }

    /// Replace the acceleration source
    pub fn with_hw_accel(mut self, hw_accel: Arc<dyn HwAccel>) -> Self {
        self.hw_accel = Some(hw_accel);
        self
    }

    pub fn name(&self) -> &'static str {
        self.filters.name()
    }
}

impl std::fmt::Debug for MediaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBackend")
            .field("filters", &self.filters.name())
            .field("hw_accel", &self.hw_accel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_backend_selected_by_config() {
        let mut config = Config::default();
        config.encoder.backend = BackendKind::Software;
        let backend = MediaBackend::for_config(&config);
        assert_eq!(backend.name(), "software");
        assert!(backend.hw_accel.is_none());
    }
}
