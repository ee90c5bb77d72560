// SPDX-License-Identifier: MPL-2.0

//! Live streaming to a network destination
//!
//! Same two-stage pipeline as recording, sized by the stream settings and
//! writing to a URL. There is no file to relocate when it finishes.

use super::transform::{OutputSpec, PipelineContext, PipelineHandle, PipelineReport, TransformEncodePipeline};
use crate::config::Config;
use crate::errors::PipelineError;
use crate::media::encoders::OutputTarget;
use tracing::{info, warn};

/// Active stream
pub struct Streamer {
    handle: PipelineHandle,
    url: String,
}

impl Streamer {
    /// Start streaming to `url`
    ///
    /// An empty destination is rejected before anything is opened.
    pub fn start(context: PipelineContext, url: &str, config: &Config) -> Result<Self, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::InvalidParameters(
                "stream destination is empty".to_string(),
            ));
        }

        let stream = &config.stream;
        let spec = OutputSpec {
            width: stream.width,
            height: stream.height,
            bitrate_kbps: stream.bitrate_kbps,
            gop_size: stream.gop_size,
            max_b_frames: stream.max_b_frames,
            preferred_encoder: config.encoder.preferred.clone(),
            target: OutputTarget::Network(url.to_string()),
        };
        info!(
            url,
            width = spec.width,
            height = spec.height,
            bitrate_kbps = spec.bitrate_kbps,
            "Starting stream"
        );

        let pipeline = TransformEncodePipeline::new("streamer", context);
        let handle = PipelineHandle::launch(pipeline, spec, |result| match result {
            Ok(report) => info!(
                url = %report.target,
                packets = report.summary.packets,
                bytes = report.summary.bytes,
                "Stream ended"
            ),
            Err(e) => warn!(error = %e, "Stream ended with error"),
        })?;

        Ok(Self {
            handle,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pipeline(&self) -> &TransformEncodePipeline {
        self.handle.pipeline()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Stop and block until the connection is closed
    pub fn stop(self) -> Result<PipelineReport, PipelineError> {
        info!(url = %self.url, "Stopping stream");
        self.handle.stop()
    }
}
