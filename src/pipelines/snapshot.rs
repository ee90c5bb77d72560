// SPDX-License-Identifier: MPL-2.0

//! One-shot still capture
//!
//! Takes the next frame from the capture engine, runs it through a single-use
//! filter graph sized to the still output, composites it and writes a JPEG to
//! scratch storage.

use super::transform::PipelineContext;
use crate::config::Config;
use crate::constants::storage::SNAPSHOT_EXTENSION;
use crate::constants::timing::SNAPSHOT_FRAME_TIMEOUT;
use crate::errors::SnapshotError;
use crate::media::encoders::still::StillEncoder;
use crate::media::filters::{FilterGraphConfig, FilterInput, FilterOutput};
use crate::media::frame::FrameBuffer;
use crate::media::zoom::CropRect;
use crate::storage::unique_media_path;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Still output parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub scratch_dir: PathBuf,
}

impl SnapshotRequest {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.snapshot.width,
            height: config.snapshot.height,
            jpeg_quality: config.snapshot.jpeg_quality,
            scratch_dir: config.scratch_dir.clone(),
        }
    }
}

/// A saved still
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotResult {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Capture, filter, composite and save one still
pub fn take_snapshot(
    context: &PipelineContext,
    request: &SnapshotRequest,
) -> Result<SnapshotResult, SnapshotError> {
    let frame = context
        .engine
        .request_single_frame()
        .wait(SNAPSHOT_FRAME_TIMEOUT)
        .ok_or(SnapshotError::NoFrameAvailable)?;
    debug!(
        width = frame.width(),
        height = frame.height(),
        hardware = frame.is_hardware(),
        "Snapshot frame received"
    );

    let mut still = filter_once(context, frame, request.width, request.height)?;
    context.compositor.composite(&mut still);

    let encoded = StillEncoder::jpeg(request.jpeg_quality)
        .encode(&still)
        .map_err(SnapshotError::EncodingFailed)?;

    std::fs::create_dir_all(&request.scratch_dir)?;
    let path = unique_media_path(&request.scratch_dir, SNAPSHOT_EXTENSION);
    encoded.save(&path).map_err(SnapshotError::SaveFailed)?;

    Ok(SnapshotResult {
        path,
        width: encoded.width,
        height: encoded.height,
        bytes: encoded.data.len(),
    })
}

/// Push one frame through a fresh graph and pull the single result
fn filter_once(
    context: &PipelineContext,
    frame: FrameBuffer,
    width: u32,
    height: u32,
) -> Result<FrameBuffer, SnapshotError> {
    let failed = |e: crate::errors::PipelineError| SnapshotError::FilterFailed(e.to_string());

    let crop = context.zoom.get_crop();
    let crop = if crop.fits(frame.width(), frame.height()) {
        crop
    } else {
        CropRect::full(frame.width(), frame.height())
    };
    let config = FilterGraphConfig::plan(
        FilterInput::of(&frame),
        crop,
        width,
        height,
        context.engine.hw_device(),
    );
    let mut graph = context.backend.filters.build(&config).map_err(failed)?;

    graph.push(frame).map_err(failed)?;
    graph.push_eos().map_err(failed)?;
    loop {
        match graph.pull().map_err(failed)? {
            FilterOutput::Frame(frame) => return Ok(frame),
            FilterOutput::Again => continue,
            FilterOutput::Eof => {
                return Err(SnapshotError::FilterFailed(
                    "filter graph ended without output".to_string(),
                ));
            }
        }
    }
}

/// Run [`take_snapshot`] on its own thread
///
/// `on_saved` runs on that thread after the file is written.
pub fn spawn_snapshot<F>(
    context: PipelineContext,
    request: SnapshotRequest,
    on_saved: F,
) -> std::io::Result<JoinHandle<Result<SnapshotResult, SnapshotError>>>
where
    F: FnOnce(&SnapshotResult) + Send + 'static,
{
    thread::Builder::new()
        .name("snapshot".to_string())
        .spawn(move || match take_snapshot(&context, &request) {
            Ok(result) => {
                info!(
                    path = %result.path.display(),
                    width = result.width,
                    height = result.height,
                    "Snapshot saved"
                );
                on_saved(&result);
                Ok(result)
            }
            Err(SnapshotError::NoFrameAvailable) => {
                warn!("Snapshot failed: no frame available");
                Err(SnapshotError::NoFrameAvailable)
            }
            Err(e) => {
                error!(error = %e, "Snapshot failed");
                Err(e)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{CaptureEngine, DeviceAccessArbiter, Framerate, SyntheticDevice};
    use crate::media::osd::NoopCompositor;
    use crate::media::{MediaBackend, ZoomController};
    use std::sync::Arc;

    #[test]
    fn test_stopped_engine_yields_no_frame() {
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let engine = Arc::new(CaptureEngine::new(
            Arc::new(device),
            Arc::new(DeviceAccessArbiter::new()),
        ));
        let context = PipelineContext {
            engine,
            zoom: Arc::new(ZoomController::new(64, 48)),
            compositor: Arc::new(NoopCompositor),
            backend: MediaBackend::software(),
        };
        let request = SnapshotRequest {
            width: 32,
            height: 16,
            jpeg_quality: 80,
            scratch_dir: std::env::temp_dir(),
        };

        let started = std::time::Instant::now();
        let result = take_snapshot(&context, &request);
        assert!(matches!(result, Err(SnapshotError::NoFrameAvailable)));
        assert!(started.elapsed() < SNAPSHOT_FRAME_TIMEOUT);
    }

    #[test]
    fn test_request_from_config() {
        let config = Config::default();
        let request = SnapshotRequest::from_config(&config);
        assert_eq!((request.width, request.height), (1920, 1080));
        assert_eq!(request.jpeg_quality, 92);
    }
}
