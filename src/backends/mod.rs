// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for capture hardware
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             CameraController                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Capture engine  │  │ Exposure worker │  │
//! │  │ (V4L2/synthetic) │  │  (V4L2 ioctls)  │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`camera`]: capture devices, the capture engine and exposure controls

pub mod camera;
