// SPDX-License-Identifier: GPL-3.0-only

//! Camera controller: the command surface of the SDK
//!
//! Owns the capture engine and everything hanging off it. All commands
//! return promptly except `stop_recording`/`stop_streaming`, which block
//! until the pipeline has fully torn down.

use crate::backends::camera::exposure::{ControlInterface, ExposureCommand, ExposureWorker};
use crate::backends::camera::{CaptureDevice, CaptureEngine, DeviceAccessArbiter, open_device};
use crate::config::Config;
use crate::errors::{PipelineError, SdkError, SdkResult, SnapshotError};
use crate::media::osd::OsdCompositor;
use crate::media::{MediaBackend, ZoomController};
use crate::pipelines::{
    CompletionCallback, PipelineContext, PipelineReport, Recorder, SnapshotRequest,
    SnapshotResult, Streamer, spawn_snapshot,
};
use crate::storage::FileMover;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to one camera and its pipelines
pub struct CameraController {
    config: Config,
    engine: Arc<CaptureEngine>,
    context: PipelineContext,
    osd: Arc<OsdCompositor>,
    exposure: Mutex<Option<ExposureWorker>>,
    mover: Arc<FileMover>,
    recorder: Mutex<Option<Recorder>>,
    streamer: Mutex<Option<Streamer>>,
    shut_down: AtomicBool,
}

impl CameraController {
    /// Open the device the configuration names and start capturing
    pub fn open(config: Config) -> SdkResult<Self> {
        let device = open_device(&config)?;
        Self::new(config, device)
    }

    /// Start capturing from `device`
    pub fn new(config: Config, device: Arc<dyn CaptureDevice>) -> SdkResult<Self> {
        let backend = MediaBackend::for_config(&config);
        info!(
            device = %device.describe(),
            backend = backend.name(),
            "Creating camera controller"
        );

        let mut engine = CaptureEngine::new(device, DeviceAccessArbiter::global());
        if let Some(accel) = &backend.hw_accel {
            engine = engine.with_hw_accel(Arc::clone(accel));
        }
        let engine = Arc::new(engine);
        engine.start()?;

        let (width, height) = engine
            .stream_params()
            .map(|params| (params.width, params.height))
            .unwrap_or((config.capture.width, config.capture.height));
        let zoom = Arc::new(ZoomController::new(width, height));
        let osd = Arc::new(
            OsdCompositor::new(config.osd_enabled_at_start).with_font_file(&config.osd_font_path),
        );

        let exposure = if config.synthetic {
            None
        } else {
            match ExposureWorker::for_v4l2(&config.device_path) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!(error = %e, "Exposure controls unavailable");
                    None
                }
            }
        };

        let mover = match FileMover::start(config.storage_dir.clone()) {
            Ok(mover) => Arc::new(mover),
            Err(e) => {
                engine.stop();
                return Err(SdkError::Storage(e));
            }
        };

        let context = PipelineContext {
            engine: Arc::clone(&engine),
            zoom,
            compositor: osd.clone(),
            backend,
        };

        Ok(Self {
            config,
            engine,
            context,
            osd,
            exposure: Mutex::new(exposure),
            mover,
            recorder: Mutex::new(None),
            streamer: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Replace the exposure worker with one driving `controls`
    pub fn with_exposure_controls(self, controls: Box<dyn ControlInterface>) -> SdkResult<Self> {
        let worker = ExposureWorker::start(controls).map_err(SdkError::Other)?;
        *self.exposure.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<CaptureEngine> {
        &self.engine
    }

    pub fn zoom(&self) -> &Arc<ZoomController> {
        &self.context.zoom
    }

    pub fn osd(&self) -> &Arc<OsdCompositor> {
        &self.osd
    }

    pub fn file_mover(&self) -> &Arc<FileMover> {
        &self.mover
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PipelineError::InvalidState("controller is shut down".to_string()));
        }
        Ok(())
    }

    /// Start recording at "1080p", "720p" or "360p"
    pub fn start_recording(&self, resolution: &str) -> SdkResult<()> {
        self.ensure_open()?;
        let mut slot = self.recorder.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(Recorder::is_active) {
            return Err(PipelineError::InvalidState("recording already active".to_string()).into());
        }
        if let Some(finished) = slot.take() {
            if let Err(e) = finished.stop() {
                debug!(error = %e, "Reaped recording had failed");
            }
        }

        let mover = Arc::clone(&self.mover);
        let on_complete: CompletionCallback =
            Arc::new(move |output| mover.schedule_move(output.path));
        let recorder = Recorder::start(
            self.context.clone(),
            resolution,
            &self.config,
            Some(on_complete),
        )?;
        *slot = Some(recorder);
        Ok(())
    }

    /// Stop recording and wait for the file to be finalized
    pub fn stop_recording(&self) -> SdkResult<PipelineReport> {
        let recorder = self
            .recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PipelineError::InvalidState("no active recording".to_string()))?;
        Ok(recorder.stop()?)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Recorder::is_active)
    }

    /// Start streaming to `url`
    pub fn start_streaming(&self, url: &str) -> SdkResult<()> {
        self.ensure_open()?;
        let mut slot = self.streamer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(Streamer::is_active) {
            return Err(PipelineError::InvalidState("stream already active".to_string()).into());
        }
        if let Some(finished) = slot.take() {
            if let Err(e) = finished.stop() {
                debug!(error = %e, "Reaped stream had failed");
            }
        }

        *slot = Some(Streamer::start(self.context.clone(), url, &self.config)?);
        Ok(())
    }

    /// Stop streaming and wait for the connection to close
    pub fn stop_streaming(&self) -> SdkResult<PipelineReport> {
        let streamer = self
            .streamer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PipelineError::InvalidState("no active stream".to_string()))?;
        Ok(streamer.stop()?)
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Streamer::is_active)
    }

    /// Take a snapshot in the background
    ///
    /// The saved JPEG is handed to the file mover. Join the returned handle
    /// to learn the outcome.
    pub fn take_snapshot(&self) -> SdkResult<JoinHandle<Result<SnapshotResult, SnapshotError>>> {
        self.ensure_open()?;
        let mover = Arc::clone(&self.mover);
        let handle = spawn_snapshot(
            self.context.clone(),
            SnapshotRequest::from_config(&self.config),
            move |result| mover.schedule_move(result.path.clone()),
        )?;
        Ok(handle)
    }

    pub fn set_osd_enabled(&self, enabled: bool) {
        self.osd.set_enabled(enabled);
    }

    /// Returns true if the level changed
    pub fn zoom_in(&self) -> bool {
        self.context.zoom.zoom_in()
    }

    pub fn zoom_out(&self) -> bool {
        self.context.zoom.zoom_out()
    }

    pub fn zoom_level(&self) -> f32 {
        self.context.zoom.level()
    }

    fn exposure_command(&self, command: ExposureCommand) -> SdkResult<()> {
        match self
            .exposure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(worker) => {
                worker.submit(command);
                Ok(())
            }
            None => Err(SdkError::Other("exposure controls unavailable".to_string())),
        }
    }

    /// Queue an ISO change (100..=1600, clamped)
    pub fn set_iso(&self, iso: u32) -> SdkResult<()> {
        self.exposure_command(ExposureCommand::SetIso(iso))
    }

    /// Queue an exposure compensation change (-4.0..=4.0, clamped)
    pub fn set_ev(&self, ev: f32) -> SdkResult<()> {
        self.exposure_command(ExposureCommand::SetEv(ev))
    }

    /// Wait for queued exposure commands to be applied
    pub fn wait_exposure_idle(&self, timeout: Duration) -> bool {
        self.exposure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|worker| worker.wait_idle(timeout))
    }

    pub fn set_position(&self, latitude: f64, longitude: f64) {
        self.osd.set_position(latitude, longitude);
    }

    pub fn set_speed(&self, speed_kmh: f64) {
        self.osd.set_speed(speed_kmh);
    }

    /// Stop pipelines, capture and workers. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down camera controller");

        let recorder = self.recorder.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(recorder) = recorder
            && let Err(e) = recorder.stop()
        {
            warn!(error = %e, "Recording did not finish cleanly");
        }
        let streamer = self.streamer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(streamer) = streamer
            && let Err(e) = streamer.stop()
        {
            warn!(error = %e, "Stream did not finish cleanly");
        }

        self.engine.stop();

        let exposure = self.exposure.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut worker) = exposure {
            worker.shutdown();
        }
        self.mover.shutdown();
        info!("Camera controller shut down");
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{Framerate, SyntheticDevice};
    use crate::config::BackendKind;
    use std::path::PathBuf;

    fn config() -> (Config, PathBuf) {
        let root = std::env::temp_dir().join(format!("controller-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.synthetic = true;
        config.scratch_dir = root.join("scratch");
        config.storage_dir = root.join("storage");
        config.encoder.backend = BackendKind::Software;
        (config, root)
    }

    #[test]
    fn test_stop_without_recording_is_an_error() {
        let (config, root) = config();
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let controller = CameraController::new(config, Arc::new(device)).unwrap();
        assert!(controller.stop_recording().is_err());
        assert!(controller.stop_streaming().is_err());
        assert!(controller.set_iso(400).is_err());
        controller.shutdown();
        controller.shutdown();
        assert!(!controller.engine().is_running());
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_commands_after_shutdown_are_rejected() {
        let (config, root) = config();
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let controller = CameraController::new(config, Arc::new(device)).unwrap();
        controller.shutdown();
        assert!(controller.start_recording("720p").is_err());
        assert!(controller.take_snapshot().is_err());
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_finished_recording_is_reaped_on_next_start() {
        let (config, root) = config();
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let controller = CameraController::new(config, Arc::new(device)).unwrap();
        controller.start_recording("360p").unwrap();
        assert!(controller.is_recording());

        // Capture ending closes the recording's queue and the run winds down
        controller.engine().stop();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while controller.is_recording() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!controller.is_recording());

        controller.engine().start().unwrap();
        controller.start_recording("360p").unwrap();
        assert!(controller.is_recording());
        controller.stop_recording().unwrap();
        controller.shutdown();
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_zoom_and_osd_commands() {
        let (config, root) = config();
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30));
        let controller = CameraController::new(config, Arc::new(device)).unwrap();
        assert!(!controller.zoom_out());
        assert!(controller.zoom_in());
        assert!((controller.zoom_level() - 1.1).abs() < 1e-6);

        controller.set_osd_enabled(true);
        assert!(controller.osd().is_enabled());
        controller.set_position(52.5, 13.4);
        controller.set_speed(42.0);
        assert_eq!(controller.osd().telemetry().speed_kmh, Some(42.0));
        std::fs::remove_dir_all(root).ok();
    }
}
