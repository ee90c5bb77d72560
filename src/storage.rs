// SPDX-License-Identifier: MPL-2.0

//! Storage utilities for recordings and snapshots
//!
//! Outputs are written to scratch storage under a timestamp-derived name and
//! handed to a [`FileMover`] once complete, which relocates them to durable
//! storage on its own thread.

use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::constants::storage::FILENAME_TIMESTAMP_FORMAT;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Base name of a media file captured at `time`
pub fn media_base_name(time: DateTime<Local>) -> String {
    time.format(FILENAME_TIMESTAMP_FORMAT).to_string()
}

/// Unused path `<dir>/<timestamp>.<extension>`
///
/// Outputs started within the same second get a `_1`, `_2`, ... suffix.
pub fn unique_media_path(dir: &Path, extension: &str) -> PathBuf {
    let base = media_base_name(Local::now());
    let mut path = dir.join(format!("{}.{}", base, extension));
    let mut suffix = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", base, suffix, extension));
        suffix += 1;
    }
    path
}

/// Move a file, falling back to copy + remove across filesystems
pub fn move_file_robust(src: &Path, dst: &Path) -> Result<(), String> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");
            std::fs::copy(src, dst).map_err(|e| {
                format!(
                    "Failed to copy {} to {}: {}",
                    src.display(),
                    dst.display(),
                    e
                )
            })?;
            std::fs::remove_file(src)
                .map_err(|e| format!("Failed to remove {}: {}", src.display(), e))
        }
        Err(e) => Err(format!(
            "Failed to move {} to {}: {}",
            src.display(),
            dst.display(),
            e
        )),
    }
}

#[derive(Debug, Default)]
struct MoveQueue {
    pending: VecDeque<PathBuf>,
    /// A move has been taken off the queue and is in progress
    busy: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct MoverShared {
    queue: Mutex<MoveQueue>,
    changed: Condvar,
    moved: AtomicU64,
    failed: AtomicU64,
}

impl MoverShared {
    fn lock(&self) -> MutexGuard<'_, MoveQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct MoverState {
    destination: PathBuf,
    shared: Arc<MoverShared>,
}

impl MoverState {
    fn step(&mut self) -> LoopAction {
        let src = {
            let mut queue = self.shared.lock();
            loop {
                if let Some(src) = queue.pending.pop_front() {
                    queue.busy = true;
                    break src;
                }
                if queue.shutdown {
                    return LoopAction::Stop;
                }
                queue = self
                    .shared
                    .changed
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        self.relocate(&src);

        self.shared.lock().busy = false;
        self.shared.changed.notify_all();
        LoopAction::Continue
    }

    fn relocate(&self, src: &Path) {
        let Some(name) = src.file_name() else {
            warn!(path = %src.display(), "Not a file path, skipping move");
            self.shared.failed.fetch_add(1, Ordering::SeqCst);
            return;
        };

        if let Err(e) = std::fs::create_dir_all(&self.destination) {
            error!(dir = %self.destination.display(), error = %e, "Failed to create storage directory");
            self.shared.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let dst = self.destination.join(name);
        match move_file_robust(src, &dst) {
            Ok(()) => {
                self.shared.moved.fetch_add(1, Ordering::SeqCst);
                info!(src = %src.display(), dst = %dst.display(), "Output moved to storage");
            }
            Err(e) => {
                self.shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "Failed to move output to storage");
            }
        }
    }
}

/// Background relocation of completed outputs to durable storage
pub struct FileMover {
    destination: PathBuf,
    shared: Arc<MoverShared>,
    controller: Mutex<Option<CaptureLoopController>>,
}

impl FileMover {
    /// Start the worker moving files into `destination`
    pub fn start(destination: PathBuf) -> Result<Self, String> {
        let shared = Arc::new(MoverShared::default());
        let state = MoverState {
            destination: destination.clone(),
            shared: Arc::clone(&shared),
        };
        let controller =
            CaptureLoopController::spawn("file-mover", state, MoverState::step, |_| {})
                .map_err(|e| format!("Failed to spawn file mover: {}", e))?;

        Ok(Self {
            destination,
            shared,
            controller: Mutex::new(Some(controller)),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Queue `path` for relocation; returns immediately
    pub fn schedule_move(&self, path: PathBuf) {
        let mut queue = self.shared.lock();
        if queue.shutdown {
            warn!(path = %path.display(), "File mover shut down, leaving file in scratch storage");
            return;
        }
        debug!(path = %path.display(), "Move scheduled");
        queue.pending.push_back(path);
        drop(queue);
        self.shared.changed.notify_all();
    }

    /// Wait until every scheduled move has finished
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.shared.lock();
        while !queue.pending.is_empty() || queue.busy {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            queue = self
                .shared
                .changed
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Successful moves so far
    pub fn moved_count(&self) -> u64 {
        self.shared.moved.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u64 {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Finish queued moves, then stop the worker. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.lock();
            queue.shutdown = true;
            debug!(pending = queue.pending.len(), "File mover shutting down");
        }
        self.shared.changed.notify_all();

        let controller = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut controller) = controller {
            // join, not stop: the worker exits once the queue is empty
            controller.join();
        }
    }
}

impl Drop for FileMover {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("camera-sdk-{}-{}", label, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_base_name_format() {
        let time = Local::now();
        let name = media_base_name(time);
        assert_eq!(name.len(), 14);
        assert!(name.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_unique_path_avoids_collisions() {
        let dir = temp_dir("unique");
        let first = unique_media_path(&dir, "jpg");
        std::fs::write(&first, b"x").unwrap();
        let second = unique_media_path(&dir, "jpg");
        assert_ne!(first, second);
        assert_eq!(second.extension().unwrap(), "jpg");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_mover_relocates_and_drains_on_shutdown() {
        let scratch = temp_dir("scratch");
        let storage = temp_dir("storage").join("nested");

        let mover = FileMover::start(storage.clone()).unwrap();
        for k in 0..3 {
            let path = scratch.join(format!("clip{}.y4m", k));
            std::fs::write(&path, vec![k as u8; 64]).unwrap();
            mover.schedule_move(path);
        }
        mover.shutdown();

        assert_eq!(mover.moved_count(), 3);
        for k in 0..3 {
            assert!(storage.join(format!("clip{}.y4m", k)).exists());
            assert!(!scratch.join(format!("clip{}.y4m", k)).exists());
        }

        // Scheduling after shutdown leaves the file alone
        let late = scratch.join("late.jpg");
        std::fs::write(&late, b"x").unwrap();
        mover.schedule_move(late.clone());
        assert!(late.exists());

        std::fs::remove_dir_all(scratch).ok();
        std::fs::remove_dir_all(storage.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_source_counts_as_failure() {
        let storage = temp_dir("missing");
        let mover = FileMover::start(storage.clone()).unwrap();
        mover.schedule_move(storage.join("does-not-exist.jpg"));
        assert!(mover.wait_idle(Duration::from_secs(2)));
        assert_eq!(mover.failed_count(), 1);
        std::fs::remove_dir_all(storage).ok();
    }
}
