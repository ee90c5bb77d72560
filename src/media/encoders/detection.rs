// SPDX-License-Identifier: MPL-2.0

//! Installed GStreamer element discovery
//!
//! Owns the encoder candidate table shared with the encoder factory and
//! exposes VA-API post-processing as the acceleration context for filter
//! graphs.

use super::Codec;
use crate::media::hw::{HwAccel, HwDevice, HwDeviceKind};
use gstreamer as gst;
use tracing::{debug, info};

/// A GStreamer encoder element the SDK knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderCandidate {
    pub element: &'static str,
    pub codec: Codec,
    pub hardware: bool,
}

const fn candidate(element: &'static str, codec: Codec, hardware: bool) -> EncoderCandidate {
    EncoderCandidate {
        element,
        codec,
        hardware,
    }
}

/// Encoder elements, best first: hardware before software, HEVC before H.264
pub const ENCODER_CANDIDATES: [EncoderCandidate; 11] = [
    candidate("vaapih265enc", Codec::H265, true),
    candidate("vah265enc", Codec::H265, true),
    candidate("nvh265enc", Codec::H265, true),
    candidate("v4l2h265enc", Codec::H265, true),
    candidate("vaapih264enc", Codec::H264, true),
    candidate("vah264enc", Codec::H264, true),
    candidate("nvh264enc", Codec::H264, true),
    candidate("v4l2h264enc", Codec::H264, true),
    candidate("x265enc", Codec::H265, false),
    candidate("x264enc", Codec::H264, false),
    candidate("openh264enc", Codec::H264, false),
];

/// Whether an element factory with this name is registered
///
/// False when GStreamer itself cannot be initialized.
pub fn has_element(name: &str) -> bool {
    gst::init().is_ok() && gst::ElementFactory::find(name).is_some()
}

/// Installed encoder candidates in priority order
pub fn installed_encoders() -> impl Iterator<Item = EncoderCandidate> {
    ENCODER_CANDIDATES
        .into_iter()
        .filter(|candidate| has_element(candidate.element))
}

/// One startup log line summarizing what the installation supports
pub fn log_available_encoders() {
    let encoders: Vec<&str> = installed_encoders()
        .inspect(|c| debug!(element = c.element, codec = ?c.codec, hardware = c.hardware, "Encoder installed"))
        .map(|c| c.element)
        .collect();
    info!(
        encoders = ?encoders,
        vapostproc = has_element("vapostproc"),
        rtspclientsink = has_element("rtspclientsink"),
        "GStreamer media elements"
    );
}

/// VA-API post-processing as the acceleration context
#[derive(Debug, Default, Clone, Copy)]
pub struct VaapiHwAccel;

impl HwAccel for VaapiHwAccel {
    fn create_device(&self) -> Result<HwDevice, String> {
        if has_element("vapostproc") {
            Ok(HwDevice::new(HwDeviceKind::VaApi, "vapostproc"))
        } else {
            Err("vapostproc element not installed".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_hardware_first() {
        let first_software = ENCODER_CANDIDATES
            .iter()
            .position(|c| !c.hardware)
            .unwrap();
        assert!(ENCODER_CANDIDATES[first_software..].iter().all(|c| !c.hardware));
        assert_eq!(ENCODER_CANDIDATES[0].codec, Codec::H265);
    }

    #[test]
    fn test_installed_is_subset_in_order() {
        let installed: Vec<_> = installed_encoders().collect();
        let mut table = ENCODER_CANDIDATES.iter();
        assert!(installed.iter().all(|c| table.any(|t| t == c)));
        let _ = VaapiHwAccel.create_device();
    }
}
