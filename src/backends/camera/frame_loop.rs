// SPDX-License-Identifier: GPL-3.0-only
//! Named worker threads driven by a step function
//!
//! Capture, exposure and file moving each own a piece of state and advance it
//! one step at a time on their own thread. [`CaptureLoopController`] runs the
//! steps, lets the owner ask for a stop between steps, and hands the state to
//! an exit hook once the loop is over.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// What a step wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Owner side of a worker thread
///
/// ```ignore
/// let worker = CaptureLoopController::spawn(
///     "capture",
///     session,
///     |session| match session.read_unit() {
///         Ok(_) => LoopAction::Continue,
///         Err(_) => LoopAction::Stop,
///     },
///     |_session| info!("capture closed"),
/// )?;
/// worker.stop();
/// ```
pub struct CaptureLoopController {
    handle: Option<JoinHandle<()>>,
    halt: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Run `step` over `state` until it returns [`LoopAction::Stop`] or a stop
    /// is requested
    ///
    /// `on_exit` gets the state back on the worker thread in both cases.
    pub fn spawn<S, F, E>(name: &str, state: S, mut step: F, on_exit: E) -> io::Result<Self>
    where
        S: Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
        E: FnOnce(S) + Send + 'static,
    {
        let halt = Arc::new(AtomicBool::new(false));
        let worker_halt = Arc::clone(&halt);
        let worker_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = state;
            let mut steps: u64 = 0;
            while !worker_halt.load(Ordering::SeqCst) {
                steps += 1;
                if step(&mut state) == LoopAction::Stop {
                    debug!(name = %worker_name, steps, "Worker finished on its own");
                    break;
                }
            }
            on_exit(state);
            info!(name = %worker_name, steps, "Worker thread exited");
        })?;
        info!(name = %name, "Worker thread started");

        Ok(Self {
            handle: Some(handle),
            halt,
            name: name.to_string(),
        })
    }

    /// Whether the worker thread has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the worker to stop after its current step
    pub fn request_stop(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the worker without asking it to stop
    ///
    /// From the worker thread itself the handle is dropped instead.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!(name = %self.name, "Self-join, detaching worker");
            return;
        }
        if let Err(panic) = handle.join() {
            warn!(name = %self.name, ?panic, "Worker thread panicked");
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_step_stop_ends_loop() {
        let (sender, receiver) = mpsc::channel();
        let mut worker = CaptureLoopController::spawn(
            "countdown",
            5u32,
            |remaining| {
                *remaining -= 1;
                if *remaining == 0 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
            move |remaining| sender.send(remaining).unwrap(),
        )
        .unwrap();

        worker.join();
        assert!(worker.is_finished());
        assert_eq!(receiver.recv().unwrap(), 0);
    }

    #[test]
    fn test_stop_interrupts_endless_loop() {
        let steps = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&steps);
        let exited = Arc::new(AtomicBool::new(false));
        let exited_flag = Arc::clone(&exited);

        let mut worker = CaptureLoopController::spawn(
            "endless",
            (),
            move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                LoopAction::Continue
            },
            move |_| exited_flag.store(true, Ordering::SeqCst),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(!worker.is_finished());
        worker.stop();

        assert!(worker.is_finished());
        assert!(exited.load(Ordering::SeqCst));
        assert!(steps.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_drop_stops_worker() {
        let exited = Arc::new(AtomicBool::new(false));
        let exited_flag = Arc::clone(&exited);
        let worker = CaptureLoopController::spawn(
            "dropped",
            (),
            |_| {
                thread::sleep(Duration::from_millis(2));
                LoopAction::Continue
            },
            move |_| exited_flag.store(true, Ordering::SeqCst),
        )
        .unwrap();

        drop(worker);
        assert!(exited.load(Ordering::SeqCst));
    }
}
