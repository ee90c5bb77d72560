// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture engine fan-out

use camera_sdk::backends::camera::{
    CaptureDevice, CaptureEngine, DeviceAccessArbiter, FrameInjector, Framerate, SyntheticDevice,
};
use camera_sdk::errors::CameraError;
use camera_sdk::media::FrameQueue;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn engine(width: u32, height: u32) -> (Arc<CaptureEngine>, FrameInjector) {
    let device = SyntheticDevice::new(width, height, Framerate::from_int(30));
    let injector = device.injector();
    let engine = Arc::new(CaptureEngine::new(
        Arc::new(device),
        Arc::new(DeviceAccessArbiter::new()),
    ));
    (engine, injector)
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_no_delivery_after_unregister() {
    let (engine, injector) = engine(32, 16);
    engine.start().unwrap();

    let kept = Arc::new(FrameQueue::new());
    let removed = Arc::new(FrameQueue::new());
    let _kept_registration = engine.register_consumer(&kept);
    let removed_registration = engine.register_consumer(&removed);

    injector.inject_frames(5);
    wait_for("first batch", || engine.frames_captured() == 5);
    engine.unregister_consumer(removed_registration);

    injector.inject_frames(5);
    wait_for("second batch", || engine.frames_captured() == 10);

    assert_eq!(removed.len(), 5);
    assert_eq!(kept.len(), 10);
    engine.stop();
}

#[test]
fn test_frames_arrive_in_capture_order() {
    let (engine, injector) = engine(32, 16);
    engine.start().unwrap();
    let queue = Arc::new(FrameQueue::new());
    let _registration = engine.register_consumer(&queue);

    injector.inject_frames(8);
    let pts: Vec<i64> = (0..8).map(|_| queue.wait_and_pop().unwrap().pts()).collect();
    assert!(pts.windows(2).all(|pair| pair[0] < pair[1]));
    engine.stop();
}

#[test]
fn test_pending_requests_complete_empty_on_stop() {
    let (engine, _injector) = engine(32, 16);
    engine.start().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let request = engine.request_single_frame();
            thread::spawn(move || request.wait(Duration::from_secs(30)))
        })
        .collect();

    let started = Instant::now();
    engine.stop();
    for waiter in waiters {
        assert!(waiter.join().unwrap().is_none());
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_request_on_stopped_engine_is_empty() {
    let (engine, _injector) = engine(32, 16);
    engine.start().unwrap();
    engine.stop();

    let started = Instant::now();
    assert!(engine.request_single_frame().wait(Duration::from_secs(30)).is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_single_frame_request_served_by_next_frame() {
    let (engine, injector) = engine(32, 16);
    engine.start().unwrap();
    let request = engine.request_single_frame();
    injector.inject_frames(1);

    let frame = request.wait(Duration::from_secs(2)).expect("frame");
    assert_eq!((frame.width(), frame.height()), (32, 16));
    engine.stop();
}

#[test]
fn test_stop_twice_returns() {
    let (engine, _injector) = engine(32, 16);
    engine.start().unwrap();
    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
}

#[test]
fn test_open_failure_is_reported_synchronously() {
    let device = Arc::new(SyntheticDevice::new(32, 16, Framerate::from_int(30)));
    device.set_fail_open(true);
    let engine = CaptureEngine::new(
        device.clone() as Arc<dyn CaptureDevice>,
        Arc::new(DeviceAccessArbiter::new()),
    );

    assert!(matches!(engine.start(), Err(CameraError::DeviceOpenFailure(_))));
    assert!(!engine.is_running());
    assert!(engine.stream_params().is_none());

    device.set_fail_open(false);
    engine.start().unwrap();
    assert!(engine.is_running());
    engine.stop();
}

#[test]
fn test_read_failure_closes_consumers() {
    let (engine, injector) = engine(32, 16);
    engine.start().unwrap();
    let queue = Arc::new(FrameQueue::new());
    let _registration = engine.register_consumer(&queue);

    injector.inject_frames(2);
    injector.fail_next_read("sensor unplugged");

    assert!(queue.wait_and_pop().is_some());
    assert!(queue.wait_and_pop().is_some());
    assert!(queue.wait_and_pop().is_none());
    assert!(matches!(
        engine.last_error(),
        Some(CameraError::DeviceReadFailure(_))
    ));
    wait_for("capture loop exit", || !engine.is_running());
}

#[test]
fn test_shared_arbiter_serializes_opens() {
    let arbiter = Arc::new(DeviceAccessArbiter::new());
    let engines: Vec<_> = (0..2)
        .map(|_| {
            CaptureEngine::new(
                Arc::new(SyntheticDevice::new(32, 16, Framerate::from_int(30))),
                Arc::clone(&arbiter),
            )
        })
        .collect();

    for engine in &engines {
        engine.start().unwrap();
    }
    // The arbiter is only held while opening
    drop(arbiter.acquire());
    for engine in &engines {
        assert!(engine.is_running());
        engine.stop();
    }
}
