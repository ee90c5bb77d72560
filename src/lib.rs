// SPDX-License-Identifier: MPL-2.0

//! Camera SDK for embedded recording devices
//!
//! Captures from one camera and fans frames out to concurrent consumers:
//! a recorder writing timestamped files, a network streamer and one-shot
//! snapshots. Each consumer crops for digital zoom, scales, overlays the
//! OSD and encodes on its own threads.
//!
//! # Architecture
//!
//! - [`backends`]: capture devices, capture engine, exposure controls
//! - [`media`]: frames, queues, zoom, filter graphs, encoders and writers
//! - [`pipelines`]: recorder, streamer and snapshot
//! - [`storage`]: output naming and relocation to durable storage
//! - [`controller`]: the command surface tying it all together
//! - [`config`]: persisted configuration
//!
//! # Example
//!
//! ```no_run
//! use camera_sdk::{CameraController, Config};
//!
//! let mut config = Config::load_default();
//! config.synthetic = true;
//! let camera = CameraController::open(config)?;
//! camera.start_recording("720p")?;
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! let report = camera.stop_recording()?;
//! println!("recorded {} frames", report.stats.frames_encoded);
//! # Ok::<(), camera_sdk::SdkError>(())
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use constants::OutputResolution;
pub use controller::CameraController;
pub use errors::{SdkError, SdkResult};
