// SPDX-License-Identifier: MPL-2.0

//! Error types for the camera SDK
//!
//! Errors are grouped by the part of the system that raises them:
//!
//! - [`CameraError`]: device acquisition and the capture loop
//! - [`PipelineError`]: transform/encode pipelines (recorder, streamer)
//! - [`SnapshotError`]: one-shot still capture
//! - [`FrameError`]: frame buffer access
//!
//! [`SdkError`] wraps all of them for the controller and the binary.

use std::fmt;

/// Result type alias using SdkError
pub type SdkResult<T> = Result<T, SdkError>;

/// Top-level SDK error type
#[derive(Debug, Clone)]
pub enum SdkError {
    /// Capture device errors
    Camera(CameraError),
    /// Recording/streaming pipeline errors
    Pipeline(PipelineError),
    /// Snapshot errors
    Snapshot(SnapshotError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Capture device errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The device could not be opened or configured
    DeviceOpenFailure(String),
    /// The device did not report a usable stream description
    StreamDiscoveryFailure(String),
    /// The device has no video stream in a supported format
    NoVideoStream,
    /// Reading from the device failed; ends the capture loop
    DeviceReadFailure(String),
    /// The capture thread could not be started
    Busy(String),
}

/// Transform/encode pipeline errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Rejected output parameters (unknown resolution, empty address, ...)
    InvalidParameters(String),
    /// Operation not allowed in the current pipeline state
    InvalidState(String),
    /// The capture engine has no active stream to consume
    Capture(CameraError),
    /// A filter graph could not be built or fed
    FilterGraphBuildFailure(String),
    /// Encoder or muxer/writer failure
    EncoderOrMuxFailure(String),
    /// A stage thread could not be spawned
    ThreadSpawn(String),
    /// A stage reported a failure; output was discarded
    Aborted,
}

/// Snapshot errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// No frame arrived within the wait window
    NoFrameAvailable,
    /// The single-use filter graph failed
    FilterFailed(String),
    /// Still image encoding failed
    EncodingFailed(String),
    /// Writing the still image failed
    SaveFailed(String),
}

/// Frame buffer access errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Pixel data size does not match the declared layout
    InvalidLayout {
        expected: usize,
        actual: usize,
    },
    /// Dimensions are zero or not even
    InvalidDimensions { width: u32, height: u32 },
    /// Hardware surfaces cannot be mapped for CPU writes
    NotCpuAccessible,
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::Camera(e) => write!(f, "Camera error: {}", e),
            SdkError::Pipeline(e) => write!(f, "Pipeline error: {}", e),
            SdkError::Snapshot(e) => write!(f, "Snapshot error: {}", e),
            SdkError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SdkError::Storage(msg) => write!(f, "Storage error: {}", msg),
            SdkError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::DeviceOpenFailure(msg) => write!(f, "Failed to open device: {}", msg),
            CameraError::StreamDiscoveryFailure(msg) => {
                write!(f, "Failed to discover stream: {}", msg)
            }
            CameraError::NoVideoStream => write!(f, "No usable video stream"),
            CameraError::DeviceReadFailure(msg) => write!(f, "Device read failed: {}", msg),
            CameraError::Busy(msg) => write!(f, "Capture unavailable: {}", msg),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            PipelineError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PipelineError::Capture(e) => write!(f, "Capture unavailable: {}", e),
            PipelineError::FilterGraphBuildFailure(msg) => {
                write!(f, "Filter graph failure: {}", msg)
            }
            PipelineError::EncoderOrMuxFailure(msg) => write!(f, "Encoder/muxer failure: {}", msg),
            PipelineError::ThreadSpawn(msg) => write!(f, "Failed to spawn stage thread: {}", msg),
            PipelineError::Aborted => write!(f, "Pipeline aborted after a stage failure"),
        }
    }
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::NoFrameAvailable => write!(f, "No frame available for capture"),
            SnapshotError::FilterFailed(msg) => write!(f, "Filter failed: {}", msg),
            SnapshotError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            SnapshotError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidLayout { expected, actual } => write!(
                f,
                "Invalid frame layout: expected {} bytes, got {}",
                expected, actual
            ),
            FrameError::InvalidDimensions { width, height } => {
                write!(f, "Invalid frame dimensions {}x{}", width, height)
            }
            FrameError::NotCpuAccessible => write!(f, "Hardware surface is not CPU writable"),
        }
    }
}

impl std::error::Error for SdkError {}
impl std::error::Error for CameraError {}
impl std::error::Error for PipelineError {}
impl std::error::Error for SnapshotError {}
impl std::error::Error for FrameError {}

impl From<CameraError> for SdkError {
    fn from(err: CameraError) -> Self {
        SdkError::Camera(err)
    }
}

impl From<PipelineError> for SdkError {
    fn from(err: PipelineError) -> Self {
        SdkError::Pipeline(err)
    }
}

impl From<SnapshotError> for SdkError {
    fn from(err: SnapshotError) -> Self {
        SdkError::Snapshot(err)
    }
}

impl From<CameraError> for PipelineError {
    fn from(err: CameraError) -> Self {
        PipelineError::Capture(err)
    }
}

impl From<String> for SdkError {
    fn from(msg: String) -> Self {
        SdkError::Other(msg)
    }
}

impl From<&str> for SdkError {
    fn from(msg: &str) -> Self {
        SdkError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        SdkError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::SaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_display() {
        let err: SdkError = PipelineError::Capture(CameraError::NoVideoStream).into();
        assert_eq!(
            err.to_string(),
            "Pipeline error: Capture unavailable: No usable video stream"
        );
    }

    #[test]
    fn test_io_conversion_targets_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(SdkError::from(io), SdkError::Storage(_)));
    }
}
