// SPDX-License-Identifier: MPL-2.0

//! Blocking frame queue with a terminal stopped state
//!
//! Used both as the capture fan-out sink (one per registered consumer) and as
//! the hand-off between the two stages of a transform/encode pipeline.
//! `wait_and_pop` returning `None` is the end-of-stream signal: the queue has
//! been stopped and everything queued before the stop has been handed out.

use super::frame::FrameBuffer;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct QueueState {
    items: VecDeque<FrameBuffer>,
    stopped: bool,
}

/// Unbounded FIFO of frames with explicit shutdown
#[derive(Default)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a frame and wake one waiter. Discarded once stopped.
    pub fn push(&self, frame: FrameBuffer) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.items.push_back(frame);
        }
        self.available.notify_one();
    }

    /// Block until a frame is available or the queue is stopped and drained
    pub fn wait_and_pop(&self) -> Option<FrameBuffer> {
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.items.pop_front() {
                return Some(frame);
            }
            if state.stopped {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<FrameBuffer> {
        self.lock().items.pop_front()
    }

    /// Mark the queue terminal and wake every waiter. Idempotent.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.available.notify_all();
    }

    /// Drop everything still queued
    pub fn clear(&self) {
        let drained: Vec<FrameBuffer> = self.lock().items.drain(..).collect();
        // Frames are released outside the lock
        drop(drained);
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::{PixelFormat, SoftwareImage};
    use crate::media::timebase::Rational;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn frame(pts: i64) -> FrameBuffer {
        let image = SoftwareImage::blank(PixelFormat::Nv12, 4, 2).unwrap();
        FrameBuffer::from_software(image, pts, Rational::MICROS)
    }

    #[test]
    fn test_drains_then_signals_end() {
        let queue = FrameQueue::new();
        for pts in 0..5 {
            queue.push(frame(pts));
        }
        queue.stop();
        queue.push(frame(99));

        let mut popped = Vec::new();
        while let Some(f) = queue.wait_and_pop() {
            popped.push(f.pts());
        }
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.wait_and_pop().is_none());
    }

    #[test]
    fn test_stop_wakes_blocked_waiter() {
        let queue = Arc::new(FrameQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_and_pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let queue = FrameQueue::new();
        queue.stop();
        queue.stop();
        assert!(queue.is_stopped());
        assert!(queue.wait_and_pop().is_none());
    }

    #[test]
    fn test_clear_drops_pending_frames() {
        let queue = FrameQueue::new();
        let kept = frame(1);
        queue.push(kept.clone());
        assert_eq!(kept.ref_count(), 2);

        queue.stop();
        queue.clear();
        assert_eq!(kept.ref_count(), 1);
        assert!(queue.wait_and_pop().is_none());
    }
}
