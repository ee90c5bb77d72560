// SPDX-License-Identifier: MPL-2.0

//! Recording, streaming and snapshot pipelines
//!
//! ```text
//!                      ┌──▶ Recorder  (filter ─▶ encode ─▶ file)    ──▶ FileMover
//! CaptureEngine ───────┼──▶ Streamer  (filter ─▶ encode ─▶ network)
//!                      └──▶ Snapshot  (filter ─▶ JPEG)              ──▶ FileMover
//! ```
//!
//! Recorder and streamer share [`transform::TransformEncodePipeline`] and
//! differ only in the output they write to. Each observes zoom changes on
//! its own and rebuilds its own filter graph.
//!
//! # Modules
//!
//! - [`transform`]: two-stage filter/encode pipeline
//! - [`recorder`]: timestamped file output with completion callback
//! - [`streamer`]: network output
//! - [`snapshot`]: one-shot JPEG capture

pub mod recorder;
pub mod snapshot;
pub mod streamer;
pub mod transform;

pub use recorder::{CompletedOutput, CompletionCallback, Recorder};
pub use snapshot::{SnapshotRequest, SnapshotResult, spawn_snapshot, take_snapshot};
pub use streamer::Streamer;
pub use transform::{
    OutputSpec, PipelineContext, PipelineHandle, PipelineReport, PipelineState, PipelineStats,
    TransformEncodePipeline,
};
