// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine
//!
//! Opens the capture device once per start, runs a dedicated capture thread
//! and distributes every decoded frame to the registered consumer queues and
//! to the oldest pending one-shot frame request.
//!
//! Consumers hold a [`ConsumerRegistration`]; the engine only keeps a weak
//! reference to their queue. Delivery happens under the consumer-set lock,
//! so once unregistration returns the queue receives nothing further.

use super::decode::FrameDecoder;
use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::StreamParams;
use super::{CaptureDevice, CaptureSession, DeviceAccessArbiter};
use crate::constants::timing::FRAME_LOG_INTERVAL;
use crate::errors::CameraError;
use crate::media::frame::FrameBuffer;
use crate::media::hw::{HwAccel, HwDevice};
use crate::media::queue::FrameQueue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stream negotiated by the current (or last) start
#[derive(Debug, Clone)]
struct ActiveStream {
    params: StreamParams,
    hw_device: Option<HwDevice>,
}

#[derive(Default)]
struct RequestState {
    /// False while the engine is not running; new requests complete empty
    accepting: bool,
    pending: VecDeque<SyncSender<Option<FrameBuffer>>>,
}

/// Fan-out set; `open` is false whenever no capture loop will deliver
#[derive(Default)]
struct ConsumerSet {
    open: bool,
    queues: HashMap<u64, Weak<FrameQueue>>,
}

#[derive(Default)]
struct EngineShared {
    running: AtomicBool,
    consumers: Mutex<ConsumerSet>,
    next_consumer_id: AtomicU64,
    requests: Mutex<RequestState>,
    stream: Mutex<Option<ActiveStream>>,
    frames_captured: AtomicU64,
    last_error: Mutex<Option<CameraError>>,
}

impl EngineShared {
    fn deliver(&self, frame: FrameBuffer) {
        {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some(request) = requests.pending.pop_front() {
                match request.try_send(Some(frame.clone())) {
                    Ok(()) => break,
                    // Requester gave up waiting; try the next oldest
                    Err(TrySendError::Disconnected(_)) | Err(TrySendError::Full(_)) => continue,
                }
            }
        }

        let mut consumers = self.consumers.lock().unwrap_or_else(PoisonError::into_inner);
        if consumers.queues.is_empty() {
            return;
        }
        consumers.queues.retain(|_, queue| match queue.upgrade() {
            Some(queue) => {
                queue.push(frame.clone());
                true
            }
            None => false,
        });
    }

    /// Close every consumer queue and complete all pending requests empty
    fn close(&self) {
        self.running.store(false, Ordering::SeqCst);

        {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            requests.accepting = false;
            for request in requests.pending.drain(..) {
                let _ = request.try_send(None);
            }
        }

        let mut consumers = self.consumers.lock().unwrap_or_else(PoisonError::into_inner);
        consumers.open = false;
        for queue in consumers.queues.values().filter_map(Weak::upgrade) {
            queue.stop();
        }
        debug!(consumers = consumers.queues.len(), "Capture consumers closed");
    }
}

/// Receipt for a registered consumer queue; unregisters on drop
pub struct ConsumerRegistration {
    id: u64,
    shared: Weak<EngineShared>,
}

impl ConsumerRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConsumerRegistration {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .queues
                .remove(&self.id);
            debug!(id = self.id, "Consumer unregistered");
        }
    }
}

/// Pending one-shot frame request
pub struct FrameRequest {
    receiver: Receiver<Option<FrameBuffer>>,
}

impl FrameRequest {
    fn completed(frame: Option<FrameBuffer>) -> Self {
        let (sender, receiver) = mpsc::sync_channel(1);
        let _ = sender.try_send(frame);
        Self { receiver }
    }

    /// Wait up to `timeout` for the frame; `None` on timeout or shutdown
    pub fn wait(self, timeout: Duration) -> Option<FrameBuffer> {
        self.receiver.recv_timeout(timeout).ok().flatten()
    }
}

/// Capture thread state
struct CaptureState {
    session: Box<dyn CaptureSession>,
    decoder: FrameDecoder,
    first_pts: Option<i64>,
    decode_failures: u64,
    shared: Arc<EngineShared>,
}

impl CaptureState {
    fn step(&mut self) -> LoopAction {
        let unit = match self.session.read_unit() {
            Ok(Some(unit)) => unit,
            Ok(None) => return LoopAction::Continue,
            Err(e) => {
                error!(error = %e, "Capture read failed, closing capture");
                *self
                    .shared
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e);
                return LoopAction::Stop;
            }
        };

        let mut frame = match self.decoder.decode(unit) {
            Ok(frame) => frame,
            Err(e) => {
                self.decode_failures += 1;
                warn!(error = %e, failures = self.decode_failures, "Dropping undecodable unit");
                return LoopAction::Continue;
            }
        };

        let first = *self.first_pts.get_or_insert(frame.pts());
        frame.set_pts((frame.pts() - first).max(0));

        let count = self.shared.frames_captured.fetch_add(1, Ordering::SeqCst) + 1;
        if count % FRAME_LOG_INTERVAL == 0 {
            debug!(frames = count, pts = frame.pts(), "Capture progress");
        }

        self.shared.deliver(frame);
        LoopAction::Continue
    }
}

/// Single-device capture with fan-out to consumers
pub struct CaptureEngine {
    device: Arc<dyn CaptureDevice>,
    arbiter: Arc<DeviceAccessArbiter>,
    hw_accel: Option<Arc<dyn HwAccel>>,
    shared: Arc<EngineShared>,
    controller: Mutex<Option<CaptureLoopController>>,
}

impl CaptureEngine {
    pub fn new(device: Arc<dyn CaptureDevice>, arbiter: Arc<DeviceAccessArbiter>) -> Self {
        Self {
            device,
            arbiter,
            hw_accel: None,
            shared: Arc::new(EngineShared::default()),
            controller: Mutex::new(None),
        }
    }

    /// Create an acceleration context on each start
    pub fn with_hw_accel(mut self, accel: Arc<dyn HwAccel>) -> Self {
        self.hw_accel = Some(accel);
        self
    }

    /// Open the device and start the capture thread
    ///
    /// Does nothing if already running. On failure no thread is left running.
    pub fn start(&self) -> Result<(), CameraError> {
        let mut controller = self.controller.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_running() {
            return Ok(());
        }
        // Reap a loop that ended on its own
        if let Some(mut finished) = controller.take() {
            finished.join();
        }

        let info = self.device.describe();
        let (session, params) = {
            let _device_access = self.arbiter.acquire();
            self.device.open()?
        };
        info!(device = %info, params = %params, "Capture device opened");

        let hw_device = self.hw_accel.as_ref().and_then(|accel| match accel.create_device() {
            Ok(device) => {
                info!(kind = %device.kind(), name = device.name(), "Hardware acceleration ready");
                Some(device)
            }
            Err(e) => {
                warn!(error = %e, "No hardware acceleration, using software filters");
                None
            }
        });

        *self.shared.stream.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(ActiveStream { params, hw_device });
        *self.shared.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.requests.lock().unwrap_or_else(PoisonError::into_inner).accepting = true;
        self.shared.consumers.lock().unwrap_or_else(PoisonError::into_inner).open = true;
        self.shared.running.store(true, Ordering::SeqCst);

        let state = CaptureState {
            session,
            decoder: FrameDecoder::new(params),
            first_pts: None,
            decode_failures: 0,
            shared: Arc::clone(&self.shared),
        };
        let spawned = CaptureLoopController::spawn(
            "camera-capture",
            state,
            CaptureState::step,
            |state| {
                state.shared.close();
                info!(
                    frames = state.shared.frames_captured.load(Ordering::SeqCst),
                    "Capture session closed"
                );
            },
        );

        match spawned {
            Ok(loop_controller) => {
                *controller = Some(loop_controller);
                Ok(())
            }
            Err(e) => {
                self.shared.close();
                Err(CameraError::Busy(format!("Failed to spawn capture thread: {}", e)))
            }
        }
    }

    /// Stop capturing; consumer queues are closed and pending requests
    /// complete empty. Idempotent.
    pub fn stop(&self) {
        let controller = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match controller {
            Some(mut controller) => {
                info!("Stopping capture");
                controller.stop();
            }
            None => debug!("Capture already stopped"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Add a queue to the fan-out set
    ///
    /// If capture has already ended the queue is stopped right away, the
    /// same closure a consumer registered earlier would have seen.
    pub fn register_consumer(&self, queue: &Arc<FrameQueue>) -> ConsumerRegistration {
        let id = self.shared.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        let mut consumers = self.shared.consumers.lock().unwrap_or_else(PoisonError::into_inner);
        if consumers.open {
            consumers.queues.insert(id, Arc::downgrade(queue));
            debug!(id, "Consumer registered");
        } else {
            queue.stop();
            debug!(id, "Consumer registered after capture ended, queue closed");
        }
        drop(consumers);
        ConsumerRegistration {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Remove a queue from the fan-out set; no frame is delivered to it
    /// after this returns
    pub fn unregister_consumer(&self, registration: ConsumerRegistration) {
        drop(registration);
    }

    pub fn consumer_count(&self) -> usize {
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queues
            .len()
    }

    /// Ask for the next captured frame
    ///
    /// Completes empty right away if the engine is not running.
    pub fn request_single_frame(&self) -> FrameRequest {
        let mut requests = self.shared.requests.lock().unwrap_or_else(PoisonError::into_inner);
        if !requests.accepting {
            drop(requests);
            debug!("Frame requested from stopped engine");
            return FrameRequest::completed(None);
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        requests.pending.push_back(sender);
        FrameRequest { receiver }
    }

    /// Decode parameters of the current stream
    pub fn stream_params(&self) -> Option<StreamParams> {
        self.shared
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|stream| stream.params)
    }

    /// Acceleration context of the current stream
    pub fn hw_device(&self) -> Option<HwDevice> {
        self.shared
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|stream| stream.hw_device.clone())
    }

    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::SeqCst)
    }

    /// Error that ended the last capture session, if any
    pub fn last_error(&self) -> Option<CameraError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::SyntheticDevice;
    use crate::backends::camera::types::Framerate;

    fn engine() -> (CaptureEngine, crate::backends::camera::FrameInjector) {
        let device = SyntheticDevice::new(16, 8, Framerate::from_int(30));
        let injector = device.injector();
        let engine = CaptureEngine::new(Arc::new(device), Arc::new(DeviceAccessArbiter::new()));
        (engine, injector)
    }

    #[test]
    fn test_fan_out_shares_storage() {
        let (engine, injector) = engine();
        engine.start().unwrap();

        let a = Arc::new(FrameQueue::new());
        let b = Arc::new(FrameQueue::new());
        let _ra = engine.register_consumer(&a);
        let _rb = engine.register_consumer(&b);

        injector.inject_frames(1);
        let fa = a.wait_and_pop().unwrap();
        let fb = b.wait_and_pop().unwrap();
        assert!(fa.shares_storage_with(&fb));
        assert_eq!(fa.pts(), 0);
        engine.stop();
    }

    #[test]
    fn test_timestamps_relative_to_first_frame() {
        let (engine, injector) = engine();
        engine.start().unwrap();
        let queue = Arc::new(FrameQueue::new());
        let _registration = engine.register_consumer(&queue);

        injector.inject_frames(3);
        let pts: Vec<i64> = (0..3).map(|_| queue.wait_and_pop().unwrap().pts()).collect();
        assert_eq!(pts, vec![0, 33_333, 66_667]);
        engine.stop();
    }

    #[test]
    fn test_dropped_registration_stops_delivery() {
        let (engine, injector) = engine();
        engine.start().unwrap();
        let queue = Arc::new(FrameQueue::new());
        let registration = engine.register_consumer(&queue);
        assert_eq!(engine.consumer_count(), 1);
        engine.unregister_consumer(registration);
        assert_eq!(engine.consumer_count(), 0);

        injector.inject_frames(2);
        assert!(injector.wait_drained(Duration::from_secs(2)));
        engine.stop();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_register_after_stop_closes_queue() {
        let (engine, injector) = engine();
        engine.start().unwrap();
        engine.stop();

        let queue = Arc::new(FrameQueue::new());
        let _registration = engine.register_consumer(&queue);
        assert!(queue.is_stopped());
        assert_eq!(engine.consumer_count(), 0);
        assert!(queue.wait_and_pop().is_none());
        drop(injector);
    }

    #[test]
    fn test_register_after_read_failure_closes_queue() {
        let (engine, injector) = engine();
        engine.start().unwrap();
        injector.fail_next_read("sensor unplugged");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while engine.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!engine.is_running());

        let queue = Arc::new(FrameQueue::new());
        let _registration = engine.register_consumer(&queue);
        assert!(queue.is_stopped());
        engine.stop();
    }

    #[test]
    fn test_start_is_idempotent() {
        let device = Arc::new(SyntheticDevice::new(16, 8, Framerate::from_int(30)));
        let engine = CaptureEngine::new(device.clone(), Arc::new(DeviceAccessArbiter::new()));
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(device.open_count(), 1);
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }
}
