// SPDX-License-Identifier: MPL-2.0

//! Two-stage transform/encode pipeline
//!
//! Shared by recording and streaming. One thread filters and composites
//! frames taken from the capture fan-out; a second thread encodes them and
//! writes packets to the output. The stages hand frames over through a
//! [`FrameQueue`] and share a single failure flag:
//!
//! ```text
//! CaptureEngine ──▶ input queue ──▶ [filter + composite] ──▶ handoff queue ──▶ [encode + write]
//! ```
//!
//! The filter graph lives behind the pipeline's filter mutex. A zoom change
//! (or a frame that no longer matches the graph's input description)
//! rebuilds it: the old graph is flushed into the handoff queue first, so no
//! frame is lost across the rebuild.
//!
//! Stopping closes the input queue only. Frames already queued are still
//! filtered, encoded and written before the output is finalized.

use crate::backends::camera::types::{CaptureFormat, Framerate};
use crate::backends::camera::{CaptureEngine, ConsumerRegistration};
use crate::errors::{CameraError, PipelineError};
use crate::media::MediaBackend;
use crate::media::encoders::{
    EncoderOutput, EncoderSettings, OutputSummary, OutputTarget, OutputWriter, VideoEncoder,
};
use crate::media::filters::{FilterBackend, FilterGraph, FilterGraphConfig, FilterInput, FilterOutput};
use crate::media::frame::{FrameBuffer, FrameFormat, PixelFormat};
use crate::media::hw::HwDevice;
use crate::media::osd::Compositor;
use crate::media::queue::FrameQueue;
use crate::media::timebase::Rational;
use crate::media::zoom::{CropRect, ZoomController, ZoomObserver};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a pipeline borrows from its owner
#[derive(Clone)]
pub struct PipelineContext {
    pub engine: Arc<CaptureEngine>,
    pub zoom: Arc<ZoomController>,
    pub compositor: Arc<dyn Compositor>,
    pub backend: MediaBackend,
}

/// Output parameters of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub gop_size: u32,
    pub max_b_frames: u32,
    pub preferred_encoder: Option<String>,
    pub target: OutputTarget,
}

impl OutputSpec {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(PipelineError::InvalidParameters(format!(
                "output size {}x{} must be non-zero and even",
                self.width, self.height
            )));
        }
        match &self.target {
            OutputTarget::Network(url) if url.trim().is_empty() => Err(
                PipelineError::InvalidParameters("destination address is empty".to_string()),
            ),
            OutputTarget::File(path) if path.as_os_str().is_empty() => Err(
                PipelineError::InvalidParameters("output path is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Encoder settings for a source running at `framerate`
    pub fn encoder_settings(&self, framerate: Framerate) -> EncoderSettings {
        EncoderSettings {
            width: self.width,
            height: self.height,
            fps_num: framerate.num,
            fps_den: framerate.denom,
            bitrate_kbps: self.bitrate_kbps,
            gop_size: self.gop_size,
            max_b_frames: self.max_b_frames,
            preferred_encoder: self.preferred_encoder.clone(),
        }
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Preparing,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Preparing => "preparing",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    frames_filtered: AtomicU64,
    frames_encoded: AtomicU64,
    packets_written: AtomicU64,
    filter_rebuilds: AtomicU64,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames taken from the capture fan-out
    pub frames_received: u64,
    /// Frames that left the filter graph (after compositing)
    pub frames_filtered: u64,
    /// Frames submitted to the encoder
    pub frames_encoded: u64,
    pub packets_written: u64,
    /// Rebuilds replacing a graph that had already processed frames
    pub filter_rebuilds: u64,
}

/// Result of a cleanly finished run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub id: Uuid,
    pub target: OutputTarget,
    pub summary: OutputSummary,
    pub stats: PipelineStats,
}

/// State shared between the owner and both stage threads
struct Shared {
    id: Uuid,
    state: Mutex<PipelineState>,
    stop_requested: AtomicBool,
    failed: AtomicBool,
    error: Mutex<Option<PipelineError>>,
    input: Arc<FrameQueue>,
    handoff: FrameQueue,
    registration: Mutex<Option<ConsumerRegistration>>,
    /// Filter mutex: held by every reader and writer of the graph
    graph: Mutex<Option<Box<dyn FilterGraph>>>,
    counters: Counters,
}

impl Shared {
    fn graph(&self) -> MutexGuard<'_, Option<Box<dyn FilterGraph>>> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(id = %self.id, from = %*current, to = %state, "Pipeline state");
        *current = state;
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Record the first failure and unblock both stages
    fn fail(&self, err: PipelineError) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            error!(id = %self.id, error = %err, "Pipeline stage failed");
            *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        }
        self.release_input();
        self.handoff.stop();
    }

    /// Unregister from the capture engine, then close the input queue
    fn release_input(&self) {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(registration);
        self.input.stop();
    }

    fn take_error(&self) -> PipelineError {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(PipelineError::Aborted)
    }

    fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_received: c.frames_received.load(Ordering::SeqCst),
            frames_filtered: c.frames_filtered.load(Ordering::SeqCst),
            frames_encoded: c.frames_encoded.load(Ordering::SeqCst),
            packets_written: c.packets_written.load(Ordering::SeqCst),
            filter_rebuilds: c.filter_rebuilds.load(Ordering::SeqCst),
        }
    }
}

/// Filter/compose stage
struct FilterWorker {
    shared: Arc<Shared>,
    backend: Arc<dyn FilterBackend>,
    compositor: Arc<dyn Compositor>,
    zoom: ZoomObserver,
    hw_device: Option<HwDevice>,
    out_width: u32,
    out_height: u32,
    first_pts: Option<i64>,
    /// The current graph has been fed at least one frame
    graph_fed: bool,
}

impl FilterWorker {
    fn run(mut self) {
        while let Some(mut frame) = self.shared.input.wait_and_pop() {
            if self.shared.has_failed() {
                break;
            }
            self.shared
                .counters
                .frames_received
                .fetch_add(1, Ordering::SeqCst);

            let first = *self.first_pts.get_or_insert(frame.pts());
            frame.set_pts((frame.pts() - first).max(0));

            if let Err(e) = self.process(frame) {
                self.shared.fail(e);
                break;
            }
        }

        if !self.shared.has_failed()
            && let Err(e) = self.flush()
        {
            self.shared.fail(e);
        }
        self.shared.handoff.stop();
        debug!(id = %self.shared.id, "Filter stage finished");
    }

    fn process(&mut self, frame: FrameBuffer) -> Result<(), PipelineError> {
        let zoom_changed = self.zoom.check_and_clear_changed();

        let shared = Arc::clone(&self.shared);
        let mut slot = shared.graph();
        let stale_input = slot
            .as_ref()
            .is_none_or(|graph| !graph.config().input.accepts(&frame));
        if zoom_changed || stale_input {
            self.rebuild(&mut slot, &frame)?;
        }

        let graph = slot.as_mut().ok_or_else(|| {
            PipelineError::FilterGraphBuildFailure("no filter graph".to_string())
        })?;
        graph.push(frame)?;
        self.graph_fed = true;
        self.drain(graph.as_mut())
    }

    /// Flush the current graph into the handoff queue and replace it
    fn rebuild(
        &mut self,
        slot: &mut Option<Box<dyn FilterGraph>>,
        frame: &FrameBuffer,
    ) -> Result<(), PipelineError> {
        let replacing = slot.is_some() && self.graph_fed;
        if let Some(mut old) = slot.take() {
            old.push_eos()?;
            self.drain(old.as_mut())?;
        }

        let crop = self.crop_for(frame.width(), frame.height());
        let config = FilterGraphConfig::plan(
            FilterInput::of(frame),
            crop,
            self.out_width,
            self.out_height,
            self.hw_device.clone(),
        );
        let graph = self.backend.build(&config)?;

        if replacing {
            self.shared
                .counters
                .filter_rebuilds
                .fetch_add(1, Ordering::SeqCst);
        }
        info!(
            id = %self.shared.id,
            crop_x = crop.x,
            crop_y = crop.y,
            crop_w = crop.width,
            crop_h = crop.height,
            hardware = config.uses_hardware(),
            "Filter graph rebuilt"
        );

        *slot = Some(graph);
        self.graph_fed = false;
        Ok(())
    }

    fn crop_for(&self, width: u32, height: u32) -> CropRect {
        let crop = self.zoom.crop();
        if crop.fits(width, height) {
            crop
        } else {
            warn!(width, height, ?crop, "Zoom crop does not fit frame, using full frame");
            CropRect::full(width, height)
        }
    }

    /// Hand every ready frame to the compositor and the encode stage
    fn drain(&self, graph: &mut dyn FilterGraph) -> Result<(), PipelineError> {
        loop {
            match graph.pull()? {
                FilterOutput::Frame(mut frame) => {
                    self.compositor.composite(&mut frame);
                    self.shared.handoff.push(frame);
                    self.shared
                        .counters
                        .frames_filtered
                        .fetch_add(1, Ordering::SeqCst);
                }
                FilterOutput::Again | FilterOutput::Eof => return Ok(()),
            }
            if self.shared.has_failed() {
                return Ok(());
            }
        }
    }

    /// Push end-of-stream through the current graph
    fn flush(&self) -> Result<(), PipelineError> {
        let mut slot = self.shared.graph();
        if let Some(graph) = slot.as_mut() {
            graph.push_eos()?;
            self.drain(graph.as_mut())?;
        }
        Ok(())
    }
}

/// Encode/emit stage
struct EncodeWorker {
    shared: Arc<Shared>,
    encoder: Box<dyn VideoEncoder>,
    writer: Box<dyn OutputWriter>,
    encoder_time_base: Rational,
    last_pts: Option<i64>,
}

impl EncodeWorker {
    fn run(&mut self) {
        while let Some(frame) = self.shared.handoff.wait_and_pop() {
            if self.shared.has_failed() {
                break;
            }
            if let Err(e) = self.encode(frame) {
                self.shared.fail(e);
                break;
            }
        }
        debug!(id = %self.shared.id, "Encode stage finished");
    }

    fn encode(&mut self, mut frame: FrameBuffer) -> Result<(), PipelineError> {
        frame.retime(self.encoder_time_base);
        if let Some(last) = self.last_pts
            && frame.pts() <= last
        {
            debug!(pts = frame.pts(), last, "Timestamp collision after rescale, bumping");
            frame.set_pts(last + 1);
        }
        self.last_pts = Some(frame.pts());

        self.encoder.send_frame(Some(&frame))?;
        self.shared
            .counters
            .frames_encoded
            .fetch_add(1, Ordering::SeqCst);
        self.write_ready().map(|_| ())
    }

    /// Write every packet the encoder has ready; true once it reports end of stream
    fn write_ready(&mut self) -> Result<bool, PipelineError> {
        loop {
            match self.encoder.receive_packet()? {
                EncoderOutput::Packet(mut packet) => {
                    packet.rescale(self.writer.time_base());
                    self.writer.write_packet(packet)?;
                    self.shared
                        .counters
                        .packets_written
                        .fetch_add(1, Ordering::SeqCst);
                }
                EncoderOutput::Again => return Ok(false),
                EncoderOutput::Eof => return Ok(true),
            }
        }
    }

    /// Flush the encoder and finish the container
    fn finish(mut self) -> Result<OutputSummary, PipelineError> {
        self.encoder.send_frame(None)?;
        while !self.write_ready()? {}
        self.writer.write_trailer()
    }
}

struct StageThreads {
    filter: JoinHandle<()>,
    encode: JoinHandle<EncodeWorker>,
}

/// One recording or streaming run
pub struct TransformEncodePipeline {
    label: String,
    context: PipelineContext,
    shared: Arc<Shared>,
    spec: Mutex<Option<OutputSpec>>,
    threads: Mutex<Option<StageThreads>>,
}

impl TransformEncodePipeline {
    pub fn new(label: &str, context: PipelineContext) -> Self {
        Self {
            label: label.to_string(),
            context,
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                state: Mutex::new(PipelineState::Idle),
                stop_requested: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                error: Mutex::new(None),
                input: Arc::new(FrameQueue::new()),
                handoff: FrameQueue::new(),
                registration: Mutex::new(None),
                graph: Mutex::new(None),
                counters: Counters::default(),
            }),
            spec: Mutex::new(None),
            threads: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    /// Configuration of the current filter graph
    pub fn filter_config(&self) -> Option<FilterGraphConfig> {
        self.shared.graph().as_ref().map(|graph| graph.config().clone())
    }

    pub fn target(&self) -> Option<OutputTarget> {
        self.spec
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|spec| spec.target.clone())
    }

    /// Validate output parameters; on failure the pipeline stays idle
    pub fn prepare(&self, spec: OutputSpec) -> Result<(), PipelineError> {
        let state = self.state();
        if state != PipelineState::Idle {
            return Err(PipelineError::InvalidState(format!(
                "{} pipeline is {}",
                self.label, state
            )));
        }
        spec.validate()?;

        info!(
            id = %self.shared.id,
            pipeline = %self.label,
            width = spec.width,
            height = spec.height,
            bitrate_kbps = spec.bitrate_kbps,
            target = %spec.target,
            "Pipeline prepared"
        );
        *self.spec.lock().unwrap_or_else(PoisonError::into_inner) = Some(spec);
        self.shared.set_state(PipelineState::Preparing);
        Ok(())
    }

    /// Open encoder and writer, build the first graph, register with the
    /// capture engine and start both stages. Nothing keeps running on error.
    pub fn start(&self) -> Result<(), PipelineError> {
        let state = self.state();
        if state != PipelineState::Preparing {
            return Err(PipelineError::InvalidState(format!(
                "{} pipeline is {}",
                self.label, state
            )));
        }
        let spec = self
            .spec
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PipelineError::InvalidState("not prepared".to_string()))?;

        match self.launch(&spec) {
            Ok(()) => {
                self.shared.set_state(PipelineState::Running);
                info!(id = %self.shared.id, pipeline = %self.label, "Pipeline running");
                Ok(())
            }
            Err(e) => {
                error!(id = %self.shared.id, pipeline = %self.label, error = %e, "Pipeline failed to start");
                self.shared.release_input();
                discard_output(&spec.target);
                self.shared.set_state(PipelineState::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&self, spec: &OutputSpec) -> Result<(), PipelineError> {
        let engine = &self.context.engine;
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            return Err(PipelineError::InvalidState("stopped before start".to_string()));
        }
        let params = engine
            .stream_params()
            .filter(|_| engine.is_running())
            .ok_or(PipelineError::Capture(CameraError::NoVideoStream))?;
        let hw_device = engine.hw_device();

        let settings = spec.encoder_settings(params.framerate);
        let encoder = self.context.backend.encoders.open(&settings)?;
        let stream = encoder.stream_info();
        let mut writer = self.context.backend.writers.open(&spec.target, &stream)?;
        writer.write_header()?;

        let zoom = self.context.zoom.observer();
        let input = FilterInput {
            width: params.width,
            height: params.height,
            format: match params.format {
                CaptureFormat::Hardware => FrameFormat::Hardware {
                    sw_format: PixelFormat::Nv12,
                },
                _ => FrameFormat::Software(PixelFormat::Nv12),
            },
            hw_frames: None,
            time_base: params.time_base,
        };
        let config = FilterGraphConfig::plan(
            input,
            zoom.crop(),
            spec.width,
            spec.height,
            hw_device.clone(),
        );
        let graph = self.context.backend.filters.build(&config)?;
        *self.shared.graph() = Some(graph);

        info!(
            id = %self.shared.id,
            encoder = encoder.name(),
            codec = ?stream.codec,
            filters = self.context.backend.filters.name(),
            hardware = config.uses_hardware(),
            "Pipeline resources opened"
        );

        let mut encode_worker = EncodeWorker {
            shared: Arc::clone(&self.shared),
            encoder,
            writer,
            encoder_time_base: stream.time_base,
            last_pts: None,
        };
        let encode = thread::Builder::new()
            .name(format!("{}-encode", self.label))
            .spawn(move || {
                encode_worker.run();
                encode_worker
            })
            .map_err(|e| PipelineError::ThreadSpawn(e.to_string()))?;

        *self
            .shared
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            Some(engine.register_consumer(&self.shared.input));

        let filter_worker = FilterWorker {
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.context.backend.filters),
            compositor: Arc::clone(&self.context.compositor),
            zoom,
            hw_device,
            out_width: spec.width,
            out_height: spec.height,
            first_pts: None,
            graph_fed: false,
        };
        let filter = match thread::Builder::new()
            .name(format!("{}-filter", self.label))
            .spawn(move || filter_worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.fail(PipelineError::ThreadSpawn(e.to_string()));
                if encode.join().is_err() {
                    warn!("Encode stage panicked during aborted start");
                }
                return Err(self.shared.take_error());
            }
        };

        *self.threads.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(StageThreads { filter, encode });
        Ok(())
    }

    /// Block until both stages exit, then drain and finalize the output.
    ///
    /// On a stage failure the output is discarded and the first error is
    /// returned.
    pub fn wait(&self) -> Result<PipelineReport, PipelineError> {
        let threads = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PipelineError::InvalidState(format!("{} pipeline is not running", self.label)))?;
        let target = self
            .target()
            .ok_or_else(|| PipelineError::InvalidState("not prepared".to_string()))?;

        if threads.filter.join().is_err() {
            self.shared
                .fail(PipelineError::FilterGraphBuildFailure("filter stage panicked".to_string()));
        }
        let encode = threads.encode.join();
        self.shared.release_input();
        self.shared.set_state(PipelineState::Draining);

        let result = match encode {
            Ok(_) if self.shared.has_failed() => Err(self.shared.take_error()),
            Ok(worker) => worker.finish(),
            Err(_) => Err(PipelineError::EncoderOrMuxFailure(
                "encode stage panicked".to_string(),
            )),
        };
        self.shared.set_state(PipelineState::Stopped);

        match result {
            Ok(summary) => {
                let stats = self.stats();
                info!(
                    id = %self.shared.id,
                    target = %target,
                    frames = stats.frames_encoded,
                    bytes = summary.bytes,
                    duration_ms = summary.duration.as_millis() as u64,
                    rebuilds = stats.filter_rebuilds,
                    "Pipeline finished"
                );
                Ok(PipelineReport {
                    id: self.shared.id,
                    target,
                    summary,
                    stats,
                })
            }
            Err(e) => {
                error!(id = %self.shared.id, target = %target, error = %e, "Pipeline output discarded");
                discard_output(&target);
                Err(e)
            }
        }
    }

    /// `start` then `wait`
    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        self.start()?;
        self.wait()
    }

    /// Request a stop from any thread. Idempotent and non-blocking.
    pub fn stop(&self) {
        if self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(id = %self.shared.id, pipeline = %self.label, "Stop requested");
        self.shared.release_input();
        if self.state() == PipelineState::Preparing {
            self.shared.set_state(PipelineState::Stopped);
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    /// Whether a stage has failed
    pub fn has_failed(&self) -> bool {
        self.shared.has_failed()
    }
}

impl Drop for TransformEncodePipeline {
    fn drop(&mut self) {
        let has_threads = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if has_threads {
            self.stop();
            if let Err(e) = self.wait() {
                debug!(error = %e, "Pipeline dropped while running");
            }
        }
    }
}

fn discard_output(target: &OutputTarget) {
    if let OutputTarget::File(path) = target
        && path.exists()
    {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed incomplete output"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove incomplete output"),
        }
    }
}

/// A started pipeline supervised on its own thread
///
/// The supervisor waits for the pipeline, hands the result to `on_finish`
/// and keeps it for [`PipelineHandle::stop`].
pub struct PipelineHandle {
    pipeline: Arc<TransformEncodePipeline>,
    supervisor: Option<JoinHandle<Result<PipelineReport, PipelineError>>>,
}

impl PipelineHandle {
    /// Prepare and start `pipeline`, then supervise it
    pub fn launch<F>(
        pipeline: TransformEncodePipeline,
        spec: OutputSpec,
        on_finish: F,
    ) -> Result<Self, PipelineError>
    where
        F: FnOnce(&Result<PipelineReport, PipelineError>) + Send + 'static,
    {
        pipeline.prepare(spec)?;
        pipeline.start()?;

        let pipeline = Arc::new(pipeline);
        let supervised = Arc::clone(&pipeline);
        let supervisor = thread::Builder::new()
            .name(format!("{}-supervisor", pipeline.label()))
            .spawn(move || {
                let result = supervised.wait();
                on_finish(&result);
                result
            });

        match supervisor {
            Ok(supervisor) => Ok(Self {
                pipeline,
                supervisor: Some(supervisor),
            }),
            Err(e) => {
                pipeline.stop();
                if let Err(err) = pipeline.wait() {
                    debug!(error = %err, "Pipeline wound down without supervisor");
                }
                Err(PipelineError::ThreadSpawn(e.to_string()))
            }
        }
    }

    pub fn pipeline(&self) -> &TransformEncodePipeline {
        &self.pipeline
    }

    /// False once the run has ended on its own (stage failure or capture closure)
    pub fn is_active(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the pipeline and block until it is fully torn down
    pub fn stop(mut self) -> Result<PipelineReport, PipelineError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<PipelineReport, PipelineError> {
        self.pipeline.stop();
        match self.supervisor.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(PipelineError::Aborted)),
            None => Err(PipelineError::InvalidState("already stopped".to_string())),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.supervisor.is_some()
            && let Err(e) = self.finish()
        {
            debug!(error = %e, "Pipeline handle dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{DeviceAccessArbiter, SyntheticDevice};
    use crate::media::encoders::y4m::Y4mWriterFactory;
    use crate::media::encoders::{Packet, StreamInfo, WriterFactory};
    use crate::media::filters::software::SoftwareFilterBackend;
    use crate::media::filters::{Accel, FilterStage};
    use crate::media::hw::{EmulatedHwAccel, HwDevice, HwDeviceKind};
    use crate::media::osd::NoopCompositor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Stops the capture engine while the pipeline is opening its output
    struct StopCaptureOnOpen {
        engine: Arc<CaptureEngine>,
    }

    impl WriterFactory for StopCaptureOnOpen {
        fn open(
            &self,
            target: &OutputTarget,
            stream: &StreamInfo,
        ) -> Result<Box<dyn OutputWriter>, PipelineError> {
            self.engine.stop();
            Y4mWriterFactory.open(target, stream)
        }
    }

    /// Writer that refuses packets after `accept` have been written
    struct ShortWriter {
        inner: Box<dyn OutputWriter>,
        accept: usize,
    }

    impl OutputWriter for ShortWriter {
        fn time_base(&self) -> Rational {
            self.inner.time_base()
        }

        fn write_header(&mut self) -> Result<(), PipelineError> {
            self.inner.write_header()
        }

        fn write_packet(&mut self, packet: Packet) -> Result<(), PipelineError> {
            if self.accept == 0 {
                return Err(PipelineError::EncoderOrMuxFailure("disk full".to_string()));
            }
            self.accept -= 1;
            self.inner.write_packet(packet)
        }

        fn write_trailer(&mut self) -> Result<OutputSummary, PipelineError> {
            self.inner.write_trailer()
        }
    }

    struct ShortWriterFactory {
        accept: usize,
    }

    impl WriterFactory for ShortWriterFactory {
        fn open(
            &self,
            target: &OutputTarget,
            stream: &StreamInfo,
        ) -> Result<Box<dyn OutputWriter>, PipelineError> {
            Ok(Box::new(ShortWriter {
                inner: Y4mWriterFactory.open(target, stream)?,
                accept: self.accept,
            }))
        }
    }

    /// Builds the first graph, refuses every later one
    #[derive(Default)]
    struct SingleGraphBackend {
        builds: AtomicUsize,
    }

    impl FilterBackend for SingleGraphBackend {
        fn name(&self) -> &'static str {
            "single-graph"
        }

        fn build(&self, config: &FilterGraphConfig) -> Result<Box<dyn FilterGraph>, PipelineError> {
            if self.builds.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(PipelineError::FilterGraphBuildFailure(
                    "out of filter memory".to_string(),
                ));
            }
            SoftwareFilterBackend.build(config)
        }
    }

    fn wait_within(
        pipeline: &Arc<TransformEncodePipeline>,
        timeout: Duration,
    ) -> Option<Result<PipelineReport, PipelineError>> {
        let (sender, receiver) = mpsc::channel();
        let waiting = Arc::clone(pipeline);
        thread::spawn(move || {
            let _ = sender.send(waiting.wait());
        });
        receiver.recv_timeout(timeout).ok()
    }

    fn context(width: u32, height: u32) -> (PipelineContext, crate::backends::camera::FrameInjector) {
        let device = SyntheticDevice::new(width, height, Framerate::from_int(30));
        let injector = device.injector();
        let engine = Arc::new(CaptureEngine::new(
            Arc::new(device),
            Arc::new(DeviceAccessArbiter::new()),
        ));
        engine.start().unwrap();
        let context = PipelineContext {
            engine,
            zoom: Arc::new(ZoomController::new(width, height)),
            compositor: Arc::new(NoopCompositor),
            backend: MediaBackend::software(),
        };
        (context, injector)
    }

    fn spec(path: std::path::PathBuf) -> OutputSpec {
        OutputSpec {
            width: 32,
            height: 16,
            bitrate_kbps: 4000,
            gop_size: 50,
            max_b_frames: 0,
            preferred_encoder: None,
            target: OutputTarget::File(path),
        }
    }

    fn temp_output() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pipeline-{}.y4m", Uuid::new_v4()))
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_prepare_rejects_bad_parameters() {
        let (context, _) = context(64, 48);
        let pipeline = TransformEncodePipeline::new("streamer", context);
        let mut bad = spec(temp_output());
        bad.target = OutputTarget::Network("  ".to_string());
        assert!(matches!(
            pipeline.prepare(bad),
            Err(PipelineError::InvalidParameters(_))
        ));
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let mut odd = spec(temp_output());
        odd.width = 33;
        assert!(pipeline.prepare(odd).is_err());
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_run_drains_queued_frames_on_stop() {
        let (context, injector) = context(64, 48);
        let engine = Arc::clone(&context.engine);
        let path = temp_output();
        let pipeline = Arc::new(TransformEncodePipeline::new("recorder", context));
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert_eq!(engine.consumer_count(), 1);

        injector.inject_frames(12);
        wait_for(|| engine.frames_captured() == 12);
        pipeline.stop();
        pipeline.stop();

        let report = pipeline.wait().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(report.stats.frames_encoded, 12);
        assert_eq!(report.stats.packets_written, 12);
        assert_eq!(report.stats.filter_rebuilds, 0);
        assert_eq!(engine.consumer_count(), 0);
        assert!(path.exists());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_capture_closure_ends_run_cleanly() {
        let (context, injector) = context(64, 48);
        let engine = Arc::clone(&context.engine);
        let pipeline = TransformEncodePipeline::new("recorder", context);
        let path = temp_output();
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();

        injector.inject_frames(3);
        wait_for(|| engine.frames_captured() == 3);
        engine.stop();

        let report = pipeline.wait().unwrap();
        assert_eq!(report.stats.frames_encoded, 3);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_start_without_capture_fails() {
        let (context, _) = context(64, 48);
        context.engine.stop();
        let pipeline = TransformEncodePipeline::new("recorder", context);
        let path = temp_output();
        pipeline.prepare(spec(path.clone())).unwrap();
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::Capture(CameraError::NoVideoStream))
        ));
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(!path.exists());
    }

    #[test]
    fn test_writer_failure_discards_output() {
        let (context, _) = context(64, 48);
        let pipeline = TransformEncodePipeline::new("streamer", context);
        let mut streaming = spec(temp_output());
        streaming.target = OutputTarget::Network("udp://127.0.0.1:1".to_string());
        pipeline.prepare(streaming).unwrap();
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::EncoderOrMuxFailure(_))
        ));
    }

    #[test]
    fn test_capture_ending_during_launch_ends_run() {
        let (mut context, _injector) = context(64, 48);
        context.backend.writers = Arc::new(StopCaptureOnOpen {
            engine: Arc::clone(&context.engine),
        });
        let engine = Arc::clone(&context.engine);
        let path = temp_output();
        let pipeline = Arc::new(TransformEncodePipeline::new("recorder", context));
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.consumer_count(), 0);

        let report = wait_within(&pipeline, Duration::from_secs(5))
            .expect("pipeline did not finish after capture ended")
            .unwrap();
        assert_eq!(report.stats.frames_encoded, 0);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rebuild_failure_mid_run_discards_output() {
        let (mut context, injector) = context(64, 48);
        context.backend.filters = Arc::new(SingleGraphBackend::default());
        let engine = Arc::clone(&context.engine);
        let zoom = Arc::clone(&context.zoom);
        let path = temp_output();
        let pipeline = Arc::new(TransformEncodePipeline::new("recorder", context));
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();

        injector.inject_frames(3);
        wait_for(|| pipeline.stats().frames_filtered == 3);
        assert!(path.exists());

        assert!(zoom.zoom_in());
        injector.inject_frames(1);

        let result = wait_within(&pipeline, Duration::from_secs(5)).expect("pipeline hung");
        assert!(matches!(result, Err(PipelineError::FilterGraphBuildFailure(_))));
        assert!(pipeline.has_failed());
        assert!(!path.exists());
        assert_eq!(engine.consumer_count(), 0);
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_writer_failure_mid_run_discards_output() {
        let (mut context, injector) = context(64, 48);
        context.backend.writers = Arc::new(ShortWriterFactory { accept: 2 });
        let engine = Arc::clone(&context.engine);
        let path = temp_output();
        let pipeline = Arc::new(TransformEncodePipeline::new("recorder", context));
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();

        injector.inject_frames(5);
        let result = wait_within(&pipeline, Duration::from_secs(5)).expect("pipeline hung");
        assert!(matches!(result, Err(PipelineError::EncoderOrMuxFailure(_))));
        assert_eq!(pipeline.stats().packets_written, 2);
        assert!(!path.exists());
        assert_eq!(engine.consumer_count(), 0);
    }

    #[test]
    fn test_hardware_frames_pass_through_without_upload() {
        let device = SyntheticDevice::new(64, 48, Framerate::from_int(30))
            .with_hardware_frames(HwDevice::new(HwDeviceKind::Emulated, "camera-isp"));
        let injector = device.injector();
        let engine = Arc::new(
            CaptureEngine::new(Arc::new(device), Arc::new(DeviceAccessArbiter::new()))
                .with_hw_accel(Arc::new(EmulatedHwAccel)),
        );
        engine.start().unwrap();
        assert!(engine.hw_device().is_some());
        let context = PipelineContext {
            engine: Arc::clone(&engine),
            zoom: Arc::new(ZoomController::new(64, 48)),
            compositor: Arc::new(NoopCompositor),
            backend: MediaBackend::software(),
        };
        let path = temp_output();
        let pipeline = TransformEncodePipeline::new("recorder", context);
        pipeline.prepare(spec(path.clone())).unwrap();
        pipeline.start().unwrap();

        injector.inject_frames(5);
        wait_for(|| pipeline.stats().frames_filtered == 5);

        let config = pipeline.filter_config().unwrap();
        assert!(config.input.hw_frames.is_some());
        assert!(config.input.is_hardware());
        assert!(!config.stages.contains(&FilterStage::HwUpload));
        assert!(matches!(
            config.stages[0],
            FilterStage::CropScale {
                accel: Accel::Hardware,
                ..
            }
        ));
        assert_eq!(config.stages[1], FilterStage::HwDownload);

        pipeline.stop();
        let report = pipeline.wait().unwrap();
        assert_eq!(report.stats.frames_encoded, 5);
        // Swapping the placeholder graph for the live frame pool is not a zoom rebuild
        assert_eq!(report.stats.filter_rebuilds, 0);
        engine.stop();
        std::fs::remove_file(path).ok();
    }
}
