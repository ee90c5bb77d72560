// SPDX-License-Identifier: MPL-2.0

//! Video recording
//!
//! A recording is a [`TransformEncodePipeline`] writing to a timestamped file
//! in scratch storage. When the run ends cleanly the completion callback
//! receives the finished file; a failed run leaves nothing behind.

use super::transform::{OutputSpec, PipelineContext, PipelineHandle, PipelineReport, TransformEncodePipeline};
use crate::config::Config;
use crate::constants::OutputResolution;
use crate::constants::encoding::MAX_B_FRAMES;
use crate::errors::{CameraError, PipelineError};
use crate::media::encoders::OutputTarget;
use crate::storage::unique_media_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A recording that finished cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedOutput {
    pub path: PathBuf,
    pub frames: u64,
    pub duration: Duration,
}

/// Called once per cleanly completed output
pub type CompletionCallback = Arc<dyn Fn(CompletedOutput) + Send + Sync>;

/// Active recording
pub struct Recorder {
    handle: PipelineHandle,
    path: PathBuf,
    resolution: OutputResolution,
}

impl Recorder {
    /// Start recording at a named resolution ("1080p", "720p", "360p")
    ///
    /// # Returns
    /// * `Ok(Recorder)` - Both stages are running
    /// * `Err(PipelineError::InvalidParameters)` - Unknown resolution; nothing was touched
    /// * `Err(_)` - Encoder, writer or filter setup failed; no thread was started
    pub fn start(
        context: PipelineContext,
        resolution_key: &str,
        config: &Config,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Self, PipelineError> {
        let resolution: OutputResolution = resolution_key
            .parse()
            .map_err(PipelineError::InvalidParameters)?;
        let (width, height) = resolution.dimensions();

        let params = context
            .engine
            .stream_params()
            .ok_or(PipelineError::Capture(CameraError::NoVideoStream))?;

        std::fs::create_dir_all(&config.scratch_dir).map_err(|e| {
            PipelineError::InvalidParameters(format!(
                "Failed to create scratch directory {}: {}",
                config.scratch_dir.display(),
                e
            ))
        })?;

        let mut spec = OutputSpec {
            width,
            height,
            bitrate_kbps: resolution.bitrate_kbps(),
            gop_size: config.gop_size,
            max_b_frames: MAX_B_FRAMES,
            preferred_encoder: config.encoder.preferred.clone(),
            target: OutputTarget::File(PathBuf::new()),
        };
        let codec = context
            .backend
            .encoders
            .codec(&spec.encoder_settings(params.framerate));
        let path = unique_media_path(&config.scratch_dir, codec.file_extension());
        spec.target = OutputTarget::File(path.clone());

        info!(
            resolution = %resolution,
            width,
            height,
            bitrate_kbps = spec.bitrate_kbps,
            path = %path.display(),
            "Starting recording"
        );

        let pipeline = TransformEncodePipeline::new("recorder", context);
        let handle = PipelineHandle::launch(pipeline, spec, move |result| {
            report_completion(result, on_complete.as_ref());
        })?;

        Ok(Self {
            handle,
            path,
            resolution,
        })
    }

    /// Scratch path the recording is written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resolution(&self) -> OutputResolution {
        self.resolution
    }

    pub fn pipeline(&self) -> &TransformEncodePipeline {
        self.handle.pipeline()
    }

    /// False once the run has ended without `stop`
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Stop and block until the file is finalized
    pub fn stop(self) -> Result<PipelineReport, PipelineError> {
        info!(path = %self.path.display(), "Stopping recording");
        self.handle.stop()
    }
}

fn report_completion(
    result: &Result<PipelineReport, PipelineError>,
    on_complete: Option<&CompletionCallback>,
) {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Recording ended without output");
            return;
        }
    };
    let OutputTarget::File(path) = &report.target else {
        return;
    };

    let output = CompletedOutput {
        path: path.clone(),
        frames: report.stats.frames_encoded,
        duration: report.summary.duration,
    };
    info!(
        path = %output.path.display(),
        frames = output.frames,
        duration_ms = output.duration.as_millis() as u64,
        "Recording complete"
    );
    if let Some(callback) = on_complete {
        callback(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{CaptureEngine, DeviceAccessArbiter, Framerate, SyntheticDevice};
    use crate::media::MediaBackend;
    use crate::media::ZoomController;
    use crate::media::osd::NoopCompositor;

    fn context() -> PipelineContext {
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let engine = Arc::new(CaptureEngine::new(
            Arc::new(device),
            Arc::new(DeviceAccessArbiter::new()),
        ));
        engine.start().unwrap();
        PipelineContext {
            engine,
            zoom: Arc::new(ZoomController::new(64, 48)),
            compositor: Arc::new(NoopCompositor),
            backend: MediaBackend::software(),
        }
    }

    #[test]
    fn test_unknown_resolution_touches_nothing() {
        let context = context();
        let engine = Arc::clone(&context.engine);
        let mut config = Config::default();
        config.scratch_dir = std::env::temp_dir().join(format!("rec-{}", uuid::Uuid::new_v4()));

        let result = Recorder::start(context, "4k", &config, None);
        assert!(matches!(result, Err(PipelineError::InvalidParameters(_))));
        assert!(!config.scratch_dir.exists());
        assert_eq!(engine.consumer_count(), 0);
    }

    #[test]
    fn test_failed_run_reports_nothing() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let callback: CompletionCallback = Arc::new(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        report_completion(&Err(PipelineError::Aborted), Some(&callback));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
